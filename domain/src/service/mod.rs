//! The procedures each binary runs, expressed against the ports so they can be
//! exercised with the in-memory adapters.

pub mod restore;
pub mod snapshots;
pub mod status;
pub mod tagging;
pub mod watchdog;

pub use restore::{RestorePlan, RestoreReport, RestoreService};
pub use snapshots::{BackupFailure, BackupReport, CleanupReport, SnapshotService, VolumeCleanup};
pub use status::{collect_statuses, status_line, STATUS_SEPARATOR};
pub use tagging::{tag_instances, TagReport};
pub use watchdog::{AlertDelivery, Watchdog, WatchdogOutcome, WatchdogSettings};
