//! Centralized configuration for site-monitor.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at the first outage.

use std::path::PathBuf;

use domain::InstanceId;
use ops_common::{
    max_ticks, require_env, require_existing_file, require_secret, ConfigError, Env, LogFormat,
    ProcessEnv,
};

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gmail address alerts are sent from and to
    pub email_address: String,
    /// App password for the mail account (`EMAIL_PASSWORD` or `EMAIL_PASSWORD_FILE`)
    pub email_password: String,
    /// Instance rebooted when the site is unreachable
    pub instance_id: InstanceId,
    /// Host probed over HTTP and reached over SSH
    pub hostname: String,
    /// Private key for the SSH login
    pub ssh_key_path: PathBuf,
    pub log_format: LogFormat,
    /// Stop after this many checks (unset = run forever)
    pub max_ticks: Option<u64>,
}

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &dyn Env) -> Result<Self, ConfigError> {
        let email_address = require_env(env, "EMAIL_ADDRESS")?;
        if !email_address.contains('@') {
            return Err(ConfigError {
                field: "EMAIL_ADDRESS",
                message: format!("{:?} is not an email address", email_address),
            });
        }
        let email_password = require_secret(env, "EMAIL_PASSWORD")?;

        let instance_id =
            InstanceId::new(require_env(env, "INSTANCE_ID")?).map_err(|e| ConfigError {
                field: "INSTANCE_ID",
                message: e.to_string(),
            })?;

        Ok(Self {
            email_address,
            email_password,
            instance_id,
            hostname: require_env(env, "EC2_HOSTNAME")?,
            ssh_key_path: require_existing_file(env, "SSH_KEY_PATH")?,
            log_format: LogFormat::from_env(env),
            max_ticks: max_ticks(env)?,
        })
    }
}
