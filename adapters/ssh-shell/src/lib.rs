//! ssh-shell: `RemoteShell` over the system OpenSSH client.
//!
//! Runs one command per connection with key-based auth. Host keys are
//! accepted on first contact (`StrictHostKeyChecking=accept-new`) and
//! password prompts are disabled (`BatchMode=yes`) so a misconfigured key
//! fails instead of hanging.

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use domain::{CoreError, RemoteShell};
use tracing::{debug, warn};

/// `ssh` exits with this status when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ssh connection to {host} failed: {stderr}")]
    Connection { host: String, stderr: String },
    #[error("remote command exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
}

impl From<SshError> for CoreError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::Connection { .. } => CoreError::Transient(e.to_string()),
            SshError::Spawn(_) | SshError::CommandFailed { .. } => CoreError::Fatal(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshShell {
    host: String,
    user: String,
    key_path: PathBuf,
    connect_timeout: Duration,
}

impl SshShell {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            key_path: key_path.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Arguments passed to `ssh` for `command`.
    fn args(&self, command: &str) -> Vec<String> {
        vec![
            "-i".into(),
            self.key_path.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            format!("{}@{}", self.user, self.host),
            command.into(),
        ]
    }

    fn execute(&self, command: &str) -> Result<String, SshError> {
        debug!(host = %self.host, user = %self.user, command, "running remote command");
        let output = Command::new("ssh")
            .args(self.args(command))
            .stdin(Stdio::null())
            .output()?;
        self.interpret(output)
    }

    fn interpret(&self, output: Output) -> Result<String, SshError> {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            if !stderr.is_empty() {
                warn!(host = %self.host, %stderr, "remote command wrote to stderr");
            }
            return Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string());
        }
        match output.status.code() {
            Some(SSH_CONNECTION_FAILURE) => Err(SshError::Connection {
                host: self.host.clone(),
                stderr,
            }),
            code => Err(SshError::CommandFailed { code, stderr }),
        }
    }
}

impl RemoteShell for SshShell {
    fn run(&self, command: &str) -> Result<String, CoreError> {
        Ok(self.execute(command)?)
    }
}
