//! volume-restore: restore an instance's data volume from its newest snapshot.
//!
//! Takes the first volume attached to `INSTANCE_ID`, creates a new volume in
//! `us-east-1a` from that volume's most recent snapshot, waits for it to be
//! `available` and attaches it at `/dev/xvdb`.
//!
//! Run:
//! ```bash
//! INSTANCE_ID=i-04e7a8ab01a267cce cargo run -p volume-restore
//! ```

use aws_ec2::Ec2Compute;
use domain::backoff::BackoffPolicy;
use domain::service::restore::{RestorePlan, RestoreService};
use domain::{CoreError, InstanceId, Tag, ThreadSleeper};
use ops_common::{
    init_tracing, print_report, require_env, system_time_to_rfc3339, LogFormat, ProcessEnv,
};
use tracing::{error, info};

const REGION: &str = "us-east-1";
const AVAILABILITY_ZONE: &str = "us-east-1a";
const DEVICE: &str = "/dev/xvdb";

fn main() {
    init_tracing(LogFormat::from_env(&ProcessEnv));
    if let Err(e) = run() {
        error!(error = %e, "volume restore failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let instance_id = require_env(&ProcessEnv, "INSTANCE_ID").map_err(|e| e.to_string())?;
    let plan = RestorePlan {
        instance_id: InstanceId::new(instance_id).map_err(|e| e.to_string())?,
        availability_zone: AVAILABILITY_ZONE.into(),
        device: DEVICE.into(),
        tags: vec![Tag::new("Environment", "dev")],
        wait: BackoffPolicy::volume_available(),
    };

    let api = Ec2Compute::for_region(REGION).map_err(|e| format!("ec2 init error: {e}"))?;
    let svc = RestoreService::new(api, ThreadSleeper, BackoffPolicy::api_retry());

    let report = svc
        .restore(&plan, |attempt, observed| match observed {
            Ok(state) => info!(attempt, %state, "waiting for volume to become available"),
            Err(e) => info!(attempt, error = %e, "volume state not readable yet"),
        })
        .map_err(|e| {
            if let CoreError::Orphaned { resource, .. } = &e {
                error!(volume = %resource, "new volume left behind; clean it up manually");
            }
            e.to_string()
        })?;

    info!(
        source_volume = %report.source_volume,
        snapshot = %report.snapshot_id,
        snapshot_started_at = %system_time_to_rfc3339(report.snapshot_started_at),
        new_volume = %report.new_volume,
        instance = %report.instance_id,
        device = %report.device,
        "volume restored and attached"
    );
    print_report(&report)
}
