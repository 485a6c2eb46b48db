//! volume-backup: snapshot every dev volume twice a day.
//!
//! The first backup runs one full interval after start. A volume whose
//! snapshot fails is logged and skipped; the loop keeps going. Set
//! `MAX_TICKS` to stop after that many runs.

use std::time::Duration;

use aws_ec2::Ec2Compute;
use domain::backoff::BackoffPolicy;
use domain::schedule::Ticker;
use domain::service::snapshots::SnapshotService;
use domain::{Tag, SystemClock, ThreadSleeper, VolumeFilter};
use ops_common::{init_tracing, max_ticks, system_time_to_rfc3339, LogFormat, ProcessEnv};
use tracing::{error, info, warn};

const REGION: &str = "us-east-1";
const BACKUP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

fn main() {
    init_tracing(LogFormat::from_env(&ProcessEnv));
    if let Err(e) = run() {
        error!(error = %e, "volume backup failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let limit = max_ticks(&ProcessEnv).map_err(|e| e.to_string())?;
    let api = Ec2Compute::for_region(REGION).map_err(|e| format!("ec2 init error: {e}"))?;
    let svc = SnapshotService::new(api, ThreadSleeper, BackoffPolicy::api_retry());
    let filter = VolumeFilter::Tagged(Tag::new("Environment", "dev"));

    info!(interval_secs = BACKUP_INTERVAL.as_secs(), "volume backup scheduled");
    let mut ticker = Ticker::new(BACKUP_INTERVAL, SystemClock, ThreadSleeper);
    ticker.run(limit, |tick| {
        if tick.skipped > 0 {
            warn!(skipped = tick.skipped, "previous backup overran; skipped runs");
        }
        match svc.backup(&filter) {
            Ok(report) => {
                for snap in &report.created {
                    info!(
                        snapshot = %snap.id,
                        volume = snap.volume_id.as_ref().map(|v| v.as_str()).unwrap_or("-"),
                        started_at = %system_time_to_rfc3339(snap.started_at),
                        "snapshot created"
                    );
                }
                for failure in &report.failed {
                    error!(volume = %failure.volume_id, error = %failure.error, "snapshot failed");
                }
                info!(
                    run = tick.number,
                    created = report.created.len(),
                    failed = report.failed.len(),
                    "backup run finished"
                );
            }
            // A failed listing only loses this run.
            Err(e) => error!(run = tick.number, error = %e, "could not list volumes"),
        }
    });
    Ok(())
}
