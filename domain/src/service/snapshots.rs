//! Snapshot backup and retention cleanup.
//!
//! Listings and deletions are retried on transient failures. Snapshot
//! creation is not: the provider takes no idempotency token, so a retry after
//! a lost response would snapshot the same volume twice.

use serde::Serialize;

use crate::backoff::BackoffPolicy;
use crate::retention::split_retained;
use crate::retry::with_retry;
use crate::{ComputeApi, CoreError, Sleeper, Snapshot, SnapshotId, VolumeFilter, VolumeId};

/// Per-volume result of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeCleanup {
    pub volume_id: VolumeId,
    pub kept: Vec<SnapshotId>,
    pub deleted: Vec<SnapshotId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub volumes: Vec<VolumeCleanup>,
}

impl CleanupReport {
    pub fn deleted_count(&self) -> usize {
        self.volumes.iter().map(|v| v.deleted.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFailure {
    pub volume_id: VolumeId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub created: Vec<Snapshot>,
    pub failed: Vec<BackupFailure>,
}

/// Snapshot lifecycle operations: periodic backup and retention cleanup.
///
/// Listing and deletion calls are retried on transient failures using the
/// service's retry policy.
pub struct SnapshotService<A: ComputeApi, S: Sleeper> {
    api: A,
    sleeper: S,
    retry: BackoffPolicy,
}

impl<A: ComputeApi, S: Sleeper> SnapshotService<A, S> {
    pub fn new(api: A, sleeper: S, retry: BackoffPolicy) -> Self {
        Self {
            api,
            sleeper,
            retry,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Delete all but the `keep` newest snapshots of every matching volume.
    ///
    /// Stops at the first failure that survives the retry policy.
    pub fn cleanup(&self, filter: &VolumeFilter, keep: usize) -> Result<CleanupReport, CoreError> {
        let volumes = with_retry(&self.retry, &self.sleeper, || self.api.list_volumes(filter))?;
        let mut report = CleanupReport::default();
        for volume in volumes {
            let snapshots = with_retry(&self.retry, &self.sleeper, || {
                self.api.list_snapshots(&volume.id)
            })?;
            let split = split_retained(snapshots, keep, |s| s.started_at);
            let mut deleted = Vec::with_capacity(split.expired.len());
            for snap in &split.expired {
                with_retry(&self.retry, &self.sleeper, || self.api.delete_snapshot(&snap.id))?;
                deleted.push(snap.id.clone());
            }
            report.volumes.push(VolumeCleanup {
                volume_id: volume.id,
                kept: split.kept.into_iter().map(|s| s.id).collect(),
                deleted,
            });
        }
        Ok(report)
    }

    /// Snapshot every matching volume once. A volume whose snapshot cannot be
    /// created is recorded in the report and the remaining volumes are still
    /// processed; only the initial listing can fail the whole pass.
    pub fn backup(&self, filter: &VolumeFilter) -> Result<BackupReport, CoreError> {
        let volumes = with_retry(&self.retry, &self.sleeper, || self.api.list_volumes(filter))?;
        let mut report = BackupReport::default();
        for volume in volumes {
            match self.api.create_snapshot(&volume.id) {
                Ok(snap) => report.created.push(snap),
                Err(e) => report.failed.push(BackupFailure {
                    volume_id: volume.id,
                    error: e.to_string(),
                }),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_cloud::{Call, InMemoryCloud, RecordingSleeper};
    use crate::Tag;
    use std::time::Duration;

    fn dev() -> VolumeFilter {
        VolumeFilter::Tagged(Tag::new("Environment", "dev"))
    }

    fn quick() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            timeout: Duration::from_secs(1),
        }
    }

    fn svc() -> SnapshotService<InMemoryCloud, RecordingSleeper> {
        SnapshotService::new(InMemoryCloud::new(), RecordingSleeper::default(), quick())
    }

    #[test]
    fn cleanup_deletes_all_but_two_newest_per_volume() {
        let svc = svc();
        let cloud = svc.api();
        let v1 = cloud.add_volume("vol-1", vec![Tag::new("Environment", "dev")], None);
        let v2 = cloud.add_volume("vol-2", vec![Tag::new("Environment", "dev")], None);
        let other = cloud.add_volume("vol-3", vec![Tag::new("Environment", "prod")], None);
        for (i, secs) in [300u64, 100, 500, 200, 400].iter().enumerate() {
            cloud.add_snapshot(&format!("snap-a{i}"), &v1, *secs);
        }
        cloud.add_snapshot("snap-b0", &v2, 10);
        cloud.add_snapshot("snap-c0", &other, 1);
        cloud.add_snapshot("snap-c1", &other, 2);
        cloud.add_snapshot("snap-c2", &other, 3);

        let report = svc.cleanup(&dev(), 2).expect("cleanup");
        assert_eq!(report.deleted_count(), 3);
        let first = &report.volumes[0];
        assert_eq!(first.volume_id, v1);
        let kept: Vec<_> = first.kept.iter().map(|s| s.as_str()).collect();
        assert_eq!(kept, vec!["snap-a2", "snap-a4"]);
        let deleted: Vec<_> = first.deleted.iter().map(|s| s.as_str()).collect();
        assert_eq!(deleted, vec!["snap-a0", "snap-a3", "snap-a1"]);
        assert!(report.volumes[1].deleted.is_empty());

        // Volumes outside the filter are untouched.
        let remaining = cloud.snapshot_ids();
        assert!(remaining.iter().any(|s| s.as_str() == "snap-c0"));
        assert_eq!(remaining.len(), 6);
    }

    #[test]
    fn cleanup_retries_throttled_calls() {
        let svc = svc();
        let cloud = svc.api();
        let v = cloud.add_volume("vol-1", vec![Tag::new("Environment", "dev")], None);
        cloud.add_snapshot("snap-1", &v, 1);
        cloud.add_snapshot("snap-2", &v, 2);
        cloud.add_snapshot("snap-3", &v, 3);
        cloud.fail_next(CoreError::Transient("RequestLimitExceeded".into()));

        let report = svc.cleanup(&dev(), 2).expect("cleanup after retry");
        assert_eq!(report.deleted_count(), 1);
        let lists = cloud
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::ListVolumes(_)))
            .count();
        assert_eq!(lists, 2);
    }

    #[test]
    fn cleanup_propagates_fatal_errors() {
        let svc = svc();
        svc.api().fail_next(CoreError::Fatal("AuthFailure".into()));
        let err = svc.cleanup(&dev(), 2).unwrap_err();
        assert_eq!(err, CoreError::Fatal("AuthFailure".into()));
    }

    #[test]
    fn backup_records_failures_and_continues() {
        let svc = svc();
        let cloud = svc.api();
        let a = cloud.add_volume("vol-a", vec![Tag::new("Environment", "dev")], None);
        let b = cloud.add_volume("vol-b", vec![Tag::new("Environment", "dev")], None);
        let c = cloud.add_volume("vol-c", vec![Tag::new("Environment", "dev")], None);
        cloud.fail_snapshots_for(&b);

        let report = svc.backup(&dev()).expect("listing succeeds");
        let created: Vec<_> = report
            .created
            .iter()
            .filter_map(|s| s.volume_id.clone())
            .collect();
        assert_eq!(created, vec![a, c]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].volume_id, b);
        assert!(report.failed[0].error.contains("IncorrectState"));
    }

    #[test]
    fn backup_fails_only_when_listing_fails() {
        let svc = svc();
        svc.api().fail_next(CoreError::Fatal("UnauthorizedOperation".into()));
        assert!(svc.backup(&dev()).is_err());
    }

    #[test]
    fn backup_does_not_retry_snapshot_creation() {
        let svc = svc();
        let cloud = svc.api();
        let v = cloud.add_volume("vol-a", vec![Tag::new("Environment", "dev")], None);
        cloud.lose_snapshot_responses(1);

        let report = svc.backup(&dev()).expect("listing succeeds");
        assert!(report.created.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("timed out"));

        let creates = cloud
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateSnapshot(_)))
            .count();
        assert_eq!(creates, 1);
        // The lost response still produced exactly one snapshot.
        assert_eq!(cloud.list_snapshots(&v).unwrap().len(), 1);
    }
}
