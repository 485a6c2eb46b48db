//! Restore an instance's data volume from its newest snapshot.
//!
//! Once the new volume exists every later failure leaves it behind
//! unattached; such errors are wrapped in [`CoreError::Orphaned`] naming the
//! volume so the operator can clean it up.

use std::time::SystemTime;

use serde::Serialize;

use crate::backoff::BackoffPolicy;
use crate::poll::poll_until;
use crate::retention::latest;
use crate::retry::with_retry;
use crate::{
    ComputeApi, CoreError, InstanceId, NewVolume, Sleeper, SnapshotId, Tag, VolumeFilter,
    VolumeId, VolumeState,
};

/// Where and how to restore an instance's volume.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub instance_id: InstanceId,
    pub availability_zone: String,
    /// Device name the restored volume is attached under.
    pub device: String,
    pub tags: Vec<Tag>,
    /// Budget for the new volume to become `available`.
    pub wait: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub source_volume: VolumeId,
    pub snapshot_id: SnapshotId,
    pub snapshot_started_at: SystemTime,
    pub new_volume: VolumeId,
    pub instance_id: InstanceId,
    pub device: String,
    /// Number of state observations until the volume was available.
    pub polls: u32,
}

/// Restores an instance's first attached volume from its newest snapshot.
pub struct RestoreService<A: ComputeApi, S: Sleeper> {
    api: A,
    sleeper: S,
    retry: BackoffPolicy,
}

impl<A: ComputeApi, S: Sleeper> RestoreService<A, S> {
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

    /// Run the restore. `on_pending` sees every observation of the new volume
    /// that was not yet `available`.
    pub fn restore<P>(&self, plan: &RestorePlan, on_pending: P) -> Result<RestoreReport, CoreError>
    where
        P: FnMut(u32, &Result<VolumeState, CoreError>),
    {
        let filter = VolumeFilter::AttachedTo(plan.instance_id.clone());
        let volumes = with_retry(&self.retry, &self.sleeper, || self.api.list_volumes(&filter))?;
        let source = volumes.into_iter().next().ok_or_else(|| {
            CoreError::NotFound(format!("no volume attached to {}", plan.instance_id))
        })?;

        let snapshots = with_retry(&self.retry, &self.sleeper, || {
            self.api.list_snapshots(&source.id)
        })?;
        let snapshot = latest(&snapshots, |s| s.started_at)
            .ok_or_else(|| CoreError::NotFound(format!("no snapshot of {}", source.id)))?
            .clone();

        let input = NewVolume {
            snapshot_id: snapshot.id.clone(),
            availability_zone: plan.availability_zone.clone(),
            tags: plan.tags.clone(),
        };
        // Not retried: a retry after a lost response would create a second volume.
        let new_volume = self.api.create_volume(&input)?;

        let polls = self
            .wait_and_attach(plan, &new_volume, on_pending)
            .map_err(|cause| CoreError::Orphaned {
                resource: new_volume.to_string(),
                cause: Box::new(cause),
            })?;

        Ok(RestoreReport {
            source_volume: source.id,
            snapshot_id: snapshot.id,
            snapshot_started_at: snapshot.started_at,
            new_volume,
            instance_id: plan.instance_id.clone(),
            device: plan.device.clone(),
            polls,
        })
    }

    fn wait_and_attach<P>(
        &self,
        plan: &RestorePlan,
        volume: &VolumeId,
        on_pending: P,
    ) -> Result<u32, CoreError>
    where
        P: FnMut(u32, &Result<VolumeState, CoreError>),
    {
        let polls = poll_until(
            &plan.wait,
            &self.sleeper,
            &format!("volume {} to become available", volume),
            &VolumeState::Available,
            || match self.api.volume_state(volume) {
                // Describe calls lag behind a fresh create.
                Err(CoreError::NotFound(msg)) => Err(CoreError::Transient(msg)),
                observed => observed,
            },
            on_pending,
        )?;

        with_retry(&self.retry, &self.sleeper, || {
            self.api.attach_volume(volume, &plan.instance_id, &plan.device)
        })?;
        Ok(polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_cloud::{Call, InMemoryCloud, RecordingSleeper};
    use std::time::Duration;

    fn plan() -> RestorePlan {
        RestorePlan {
            instance_id: InstanceId::new("i-04e7a8ab01a267cce").unwrap(),
            availability_zone: "us-east-1a".into(),
            device: "/dev/xvdb".into(),
            tags: vec![Tag::new("Environment", "dev")],
            wait: BackoffPolicy {
                max_attempts: 10,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
                timeout: Duration::from_secs(1),
            },
        }
    }

    fn svc() -> RestoreService<InMemoryCloud, RecordingSleeper> {
        RestoreService::new(
            InMemoryCloud::new(),
            RecordingSleeper::default(),
            BackoffPolicy::api_retry(),
        )
    }

    #[test]
    fn restores_newest_snapshot_and_attaches_once_available() {
        let svc = svc();
        let cloud = svc.api();
        let vol = cloud.add_volume("vol-root", vec![], Some("i-04e7a8ab01a267cce"));
        cloud.add_snapshot("snap-old", &vol, 100);
        cloud.add_snapshot("snap-newest", &vol, 300);
        cloud.add_snapshot("snap-mid", &vol, 200);
        cloud.script_volume_states(
            "vol-new1",
            vec![VolumeState::Creating, VolumeState::Creating, VolumeState::Available],
        );

        let mut pending = 0;
        let report = svc.restore(&plan(), |_, _| pending += 1).expect("restore");
        assert_eq!(report.snapshot_id.as_str(), "snap-newest");
        assert_eq!(report.source_volume, vol);
        assert_eq!(report.new_volume.as_str(), "vol-new1");
        assert_eq!(report.polls, 3);
        assert_eq!(pending, 2);

        let calls = cloud.calls();
        let create = calls.iter().find_map(|c| match c {
            Call::CreateVolume(v) => Some(v.clone()),
            _ => None,
        });
        let create = create.expect("create_volume called");
        assert_eq!(create.availability_zone, "us-east-1a");
        assert_eq!(create.tags, vec![Tag::new("Environment", "dev")]);
        assert_eq!(
            calls.last(),
            Some(&Call::AttachVolume(
                report.new_volume.clone(),
                plan().instance_id,
                "/dev/xvdb".into()
            ))
        );
    }

    #[test]
    fn never_attaches_before_available() {
        let svc = svc();
        let cloud = svc.api();
        let vol = cloud.add_volume("vol-root", vec![], Some("i-04e7a8ab01a267cce"));
        cloud.add_snapshot("snap-1", &vol, 1);
        cloud.script_volume_states("vol-new1", vec![VolumeState::Creating]);

        let err = svc.restore(&plan(), |_, _| {}).unwrap_err();
        match err {
            CoreError::Orphaned { resource, cause } => {
                assert_eq!(resource, "vol-new1");
                assert!(matches!(*cause, CoreError::Timeout { .. }));
            }
            other => panic!("expected orphaned volume, got {other:?}"),
        }
        assert!(!cloud
            .calls()
            .iter()
            .any(|c| matches!(c, Call::AttachVolume(..))));
    }

    #[test]
    fn missing_volume_or_snapshot_is_not_found() {
        let svc = svc();
        let err = svc.restore(&plan(), |_, _| {}).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        svc.api()
            .add_volume("vol-root", vec![], Some("i-04e7a8ab01a267cce"));
        let err = svc.restore(&plan(), |_, _| {}).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(msg) if msg.contains("no snapshot")));
    }

    #[test]
    fn waits_out_a_volume_not_yet_visible() {
        let svc = svc();
        let cloud = svc.api();
        let vol = cloud.add_volume("vol-root", vec![], Some("i-04e7a8ab01a267cce"));
        cloud.add_snapshot("snap-1", &vol, 1);
        cloud.hide_volume("vol-new1", 2);
        cloud.script_volume_states("vol-new1", vec![VolumeState::Available]);

        let mut pending = Vec::new();
        let report = svc
            .restore(&plan(), |n, observed| pending.push((n, observed.is_err())))
            .expect("restore once the volume shows up");
        assert_eq!(report.polls, 3);
        assert_eq!(pending, vec![(1, true), (2, true)]);
        assert!(cloud
            .calls()
            .iter()
            .any(|c| matches!(c, Call::AttachVolume(..))));
    }

    #[test]
    fn failed_attach_names_the_new_volume() {
        let svc = svc();
        let cloud = svc.api();
        let vol = cloud.add_volume("vol-root", vec![], Some("i-04e7a8ab01a267cce"));
        cloud.add_snapshot("snap-1", &vol, 1);
        cloud.script_volume_states("vol-new1", vec![VolumeState::Available]);
        cloud.fail_attach(CoreError::Fatal("VolumeInUse".into()));

        let err = svc.restore(&plan(), |_, _| {}).unwrap_err();
        assert_eq!(
            err,
            CoreError::Orphaned {
                resource: "vol-new1".into(),
                cause: Box::new(CoreError::Fatal("VolumeInUse".into())),
            }
        );
        assert!(err.to_string().contains("vol-new1"));
    }
}
