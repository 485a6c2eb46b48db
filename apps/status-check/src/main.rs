//! status-check: log the status of every instance every five seconds.
//!
//! Stopped instances are included. Each listing ends with a separator line.
//! A failed listing is logged and the next tick tries again. Set `MAX_TICKS`
//! to stop after that many listings.

use std::time::Duration;

use aws_ec2::Ec2Compute;
use domain::schedule::Ticker;
use domain::service::status::{collect_statuses, status_line, STATUS_SEPARATOR};
use domain::{SystemClock, ThreadSleeper};
use ops_common::{init_tracing, max_ticks, LogFormat, ProcessEnv};
use tracing::{error, info, warn};

const REGION: &str = "us-east-1";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn main() {
    init_tracing(LogFormat::from_env(&ProcessEnv));
    if let Err(e) = run() {
        error!(error = %e, "status check failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let limit = max_ticks(&ProcessEnv).map_err(|e| e.to_string())?;
    let api = Ec2Compute::for_region(REGION).map_err(|e| format!("ec2 init error: {e}"))?;

    let mut ticker = Ticker::new(POLL_INTERVAL, SystemClock, ThreadSleeper);
    ticker.run(limit, |tick| {
        if tick.skipped > 0 {
            warn!(skipped = tick.skipped, "status listing overran the interval");
        }
        match collect_statuses(&api) {
            Ok(statuses) => {
                for s in &statuses {
                    info!(
                        instance = %s.instance_id,
                        state = %s.state,
                        instance_status = s.instance_status.as_deref().unwrap_or("unknown"),
                        system_status = s.system_status.as_deref().unwrap_or("unknown"),
                        "{}",
                        status_line(s)
                    );
                }
                info!("{}", STATUS_SEPARATOR);
            }
            Err(e) => error!(run = tick.number, error = %e, "could not describe instance status"),
        }
    });
    Ok(())
}
