//! site-monitor: watch the website and recover it when it goes down.
//!
//! Every five minutes the app at `http://<EC2_HOSTNAME>:8080/` is probed.
//! - Non-200 response: mail an alert, restart the container over SSH.
//! - No response: mail an alert, reboot the instance, wait until it is
//!   running, give it 20 seconds, then restart the container.
//!
//! Configuration: see `config.rs` for all environment variables.

mod config;

use std::time::Duration;

use aws_ec2::Ec2Compute;
use domain::backoff::BackoffPolicy;
use domain::health::{Health, RecoveryAction};
use domain::schedule::Ticker;
use domain::service::watchdog::{AlertDelivery, Watchdog, WatchdogSettings};
use domain::{SystemClock, ThreadSleeper};
use http_probe::HttpProbe;
use ops_common::init_tracing;
use smtp_notify::{SmtpNotifier, SmtpSettings};
use ssh_shell::SshShell;
use tracing::{error, info, warn};

const REGION: &str = "us-east-1";
const CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
const APP_PORT: u16 = 8080;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SSH_USER: &str = "ubuntu";
const CONTAINER_ID: &str = "3f2f187d2906";
const ALERT_SUBJECT: &str = "SITE DOWN";
const SETTLE_DELAY: Duration = Duration::from_secs(20);

fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(cfg.log_format);

    if let Err(e) = run(cfg) {
        error!(error = %e, "site monitor failed");
        std::process::exit(1);
    }
}

fn run(cfg: config::Config) -> Result<(), String> {
    let api = Ec2Compute::for_region(REGION).map_err(|e| format!("ec2 init error: {e}"))?;
    let notifier = SmtpNotifier::new(&SmtpSettings::new(
        cfg.email_address.clone(),
        cfg.email_password.clone(),
    ))
    .map_err(|e| format!("smtp init error: {e}"))?;
    let shell = SshShell::new(cfg.hostname.clone(), SSH_USER, cfg.ssh_key_path.clone());
    let probe = HttpProbe::for_host(&cfg.hostname, APP_PORT, PROBE_TIMEOUT)
        .map_err(|e| format!("http client init error: {e}"))?;

    let settings = WatchdogSettings {
        instance_id: cfg.instance_id.clone(),
        container_id: CONTAINER_ID.into(),
        alert_subject: ALERT_SUBJECT.into(),
        reboot_wait: BackoffPolicy::instance_running(),
        settle_delay: SETTLE_DELAY,
        api_retry: BackoffPolicy::api_retry(),
    };
    let watchdog = Watchdog::new(api, notifier, shell, probe, ThreadSleeper, settings);

    info!(url = %format!("http://{}:{}/", cfg.hostname, APP_PORT), "monitoring application");
    let mut ticker = Ticker::new(CHECK_INTERVAL, SystemClock, ThreadSleeper);
    ticker.run(cfg.max_ticks, |tick| {
        if tick.skipped > 0 {
            warn!(skipped = tick.skipped, "recovery overran the check interval");
        }
        let result = watchdog.check_once_with(|attempt, observed| match observed {
            Ok(state) => info!(attempt, %state, "waiting for instance to be running"),
            Err(e) => warn!(attempt, error = %e, "instance status unavailable"),
        });
        match result {
            Ok(outcome) => {
                match &outcome.health {
                    Health::Healthy => info!("application is running successfully"),
                    Health::BadStatus(code) => warn!(status = code, "application is down"),
                    Health::Unreachable(reason) => warn!(%reason, "application not accessible"),
                }
                match &outcome.alert {
                    AlertDelivery::Failed(e) => error!(error = %e, "alert mail not sent"),
                    AlertDelivery::Sent => info!("alert mail sent"),
                    AlertDelivery::NotNeeded => {}
                }
                if let Some(before) = &outcome.status_before_reboot {
                    info!(
                        instance = %before.instance_id,
                        state = %before.state,
                        "status before reboot"
                    );
                }
                if outcome.action != RecoveryAction::None {
                    info!(
                        action = ?outcome.action,
                        reboot_polls = outcome.reboot_polls,
                        output = outcome.container_output.as_deref().unwrap_or(""),
                        "container restarted"
                    );
                }
            }
            // Recovery failures are retried at the next check.
            Err(e) => error!(check = tick.number, error = %e, "recovery failed"),
        }
    });
    Ok(())
}
