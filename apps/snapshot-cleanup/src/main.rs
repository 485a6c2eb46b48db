//! snapshot-cleanup: prune old snapshots of the dev volumes.
//!
//! For every volume tagged `Environment=dev`, keeps the two most recent
//! snapshots owned by this account and deletes the rest. Prints the cleanup
//! report as one JSON line.
//!
//! Run:
//! ```bash
//! cargo run -p snapshot-cleanup
//! ```

use aws_ec2::Ec2Compute;
use domain::backoff::BackoffPolicy;
use domain::service::snapshots::SnapshotService;
use domain::{Tag, ThreadSleeper, VolumeFilter};
use ops_common::{init_tracing, print_report, LogFormat, ProcessEnv};
use tracing::{error, info};

const KEEP_SNAPSHOTS: usize = 2;
const REGION: &str = "us-east-1";

fn main() {
    init_tracing(LogFormat::from_env(&ProcessEnv));
    if let Err(e) = run() {
        error!(error = %e, "snapshot cleanup failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let api = Ec2Compute::for_region(REGION).map_err(|e| format!("ec2 init error: {e}"))?;
    let svc = SnapshotService::new(api, ThreadSleeper, BackoffPolicy::api_retry());

    let filter = VolumeFilter::Tagged(Tag::new("Environment", "dev"));
    let report = svc
        .cleanup(&filter, KEEP_SNAPSHOTS)
        .map_err(|e| e.to_string())?;

    for v in &report.volumes {
        info!(
            volume = %v.volume_id,
            kept = v.kept.len(),
            deleted = v.deleted.len(),
            "volume cleaned"
        );
    }
    info!(region = REGION, deleted = report.deleted_count(), "snapshot cleanup done");
    print_report(&report)
}
