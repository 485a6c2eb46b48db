//! In-memory cloud, mailer, shell and probe fakes that record every call.
//!
//! Failures, lost responses and state sequences are scripted per test.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    Clock, ComputeApi, CoreError, HealthProbe, InstanceId, InstanceState, InstanceStatus,
    NewVolume, Notifier, RemoteShell, Sleeper, Snapshot, SnapshotId, Tag, Volume, VolumeFilter,
    VolumeId, VolumeState,
};

/// A control-plane call as seen by the fake, for asserting on call order and
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListVolumes(VolumeFilter),
    ListSnapshots(VolumeId),
    CreateSnapshot(VolumeId),
    DeleteSnapshot(SnapshotId),
    CreateVolume(NewVolume),
    VolumeState(VolumeId),
    AttachVolume(VolumeId, InstanceId, String),
    ListInstances,
    CreateTags(Vec<InstanceId>, Tag),
    InstanceStatuses(Vec<InstanceId>),
    RebootInstance(InstanceId),
}

#[derive(Default)]
struct CloudState {
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
    instances: Vec<InstanceId>,
    statuses: Vec<InstanceStatus>,
    /// Scripted answers for `volume_state`, consumed front to back. The last
    /// one sticks.
    volume_states: BTreeMap<VolumeId, VolumeDeque>,
    /// Scripted answers for single-instance status lookups.
    instance_states: BTreeMap<InstanceId, VecDeque<Option<InstanceState>>>,
    failing_snapshots: HashSet<VolumeId>,
    /// Snapshots still created server side, but the caller sees a timeout.
    lost_snapshot_responses: u32,
    /// Remaining `volume_state` lookups that answer not-found.
    hidden_volumes: BTreeMap<VolumeId, u32>,
    attach_failure: Option<CoreError>,
    transient_failures: VecDeque<CoreError>,
    calls: Vec<Call>,
    next_id: u64,
}

type VolumeDeque = VecDeque<VolumeState>;

/// In-memory control plane for tests. Every call is recorded.
#[derive(Default)]
pub struct InMemoryCloud {
    inner: Mutex<CloudState>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, CloudState>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Fatal("mutex poisoned".into()))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CloudState) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn add_volume(&self, id: &str, tags: Vec<Tag>, attached_to: Option<&str>) -> VolumeId {
        let vid = VolumeId(id.to_string());
        let volume = Volume {
            id: vid.clone(),
            state: if attached_to.is_some() {
                VolumeState::InUse
            } else {
                VolumeState::Available
            },
            availability_zone: Some("us-east-1a".into()),
            attached_instances: attached_to
                .map(|i| vec![InstanceId(i.to_string())])
                .unwrap_or_default(),
            tags,
        };
        self.with_state(|s| s.volumes.push(volume));
        vid
    }

    pub fn add_snapshot(&self, id: &str, volume: &VolumeId, started_secs: u64) -> SnapshotId {
        let sid = SnapshotId(id.to_string());
        let snap = Snapshot {
            id: sid.clone(),
            volume_id: Some(volume.clone()),
            started_at: UNIX_EPOCH + Duration::from_secs(started_secs),
            state: Some("completed".into()),
        };
        self.with_state(|s| s.snapshots.push(snap));
        sid
    }

    pub fn add_instance(&self, id: &str, state: InstanceState) -> InstanceId {
        let iid = InstanceId(id.to_string());
        let status = InstanceStatus {
            instance_id: iid.clone(),
            state,
            instance_status: Some("ok".into()),
            system_status: Some("ok".into()),
        };
        self.with_state(|s| {
            s.instances.push(iid.clone());
            s.statuses.push(status);
        });
        iid
    }

    /// Script the states the next created volume (or a known one) will report.
    pub fn script_volume_states(&self, id: &str, states: Vec<VolumeState>) {
        self.with_state(|s| {
            s.volume_states
                .insert(VolumeId(id.to_string()), states.into_iter().collect());
        });
    }

    /// Script what single-instance status lookups return. `None` models the
    /// provider returning no status record at all.
    pub fn script_instance_states(&self, id: &str, states: Vec<Option<InstanceState>>) {
        self.with_state(|s| {
            s.instance_states
                .insert(InstanceId(id.to_string()), states.into_iter().collect());
        });
    }

    /// Make `create_snapshot` fail for this volume.
    pub fn fail_snapshots_for(&self, volume: &VolumeId) {
        self.with_state(|s| {
            s.failing_snapshots.insert(volume.clone());
        });
    }

    /// The next `count` snapshot creations succeed in the cloud but answer
    /// with a transient timeout.
    pub fn lose_snapshot_responses(&self, count: u32) {
        self.with_state(|s| s.lost_snapshot_responses = count);
    }

    /// Answer not-found for the first `lookups` state lookups of a volume.
    pub fn hide_volume(&self, id: &str, lookups: u32) {
        self.with_state(|s| {
            s.hidden_volumes.insert(VolumeId(id.to_string()), lookups);
        });
    }

    /// Make the next `attach_volume` fail with `err`.
    pub fn fail_attach(&self, err: CoreError) {
        self.with_state(|s| s.attach_failure = Some(err));
    }

    /// Queue errors returned by the next control-plane calls, in order.
    pub fn fail_next(&self, err: CoreError) {
        self.with_state(|s| s.transient_failures.push_back(err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn snapshot_ids(&self) -> Vec<SnapshotId> {
        self.with_state(|s| s.snapshots.iter().map(|x| x.id.clone()).collect())
    }

    fn record(&self, call: Call) -> Result<std::sync::MutexGuard<'_, CloudState>, CoreError> {
        let mut s = self.state()?;
        s.calls.push(call);
        if let Some(err) = s.transient_failures.pop_front() {
            return Err(err);
        }
        Ok(s)
    }
}

impl ComputeApi for InMemoryCloud {
    fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>, CoreError> {
        let s = self.record(Call::ListVolumes(filter.clone()))?;
        Ok(s.volumes
            .iter()
            .filter(|v| match filter {
                VolumeFilter::Tagged(tag) => v.tags.contains(tag),
                VolumeFilter::AttachedTo(i) => v.attached_instances.contains(i),
            })
            .cloned()
            .collect())
    }

    fn list_snapshots(&self, volume_id: &VolumeId) -> Result<Vec<Snapshot>, CoreError> {
        let s = self.record(Call::ListSnapshots(volume_id.clone()))?;
        Ok(s.snapshots
            .iter()
            .filter(|x| x.volume_id.as_ref() == Some(volume_id))
            .cloned()
            .collect())
    }

    fn create_snapshot(&self, volume_id: &VolumeId) -> Result<Snapshot, CoreError> {
        let mut s = self.record(Call::CreateSnapshot(volume_id.clone()))?;
        if s.failing_snapshots.contains(volume_id) {
            return Err(CoreError::Fatal(format!(
                "IncorrectState: volume {} cannot be snapshotted",
                volume_id
            )));
        }
        s.next_id += 1;
        let snap = Snapshot {
            id: SnapshotId(format!("snap-new{}", s.next_id)),
            volume_id: Some(volume_id.clone()),
            started_at: UNIX_EPOCH + Duration::from_secs(1_000_000 + s.next_id),
            state: Some("pending".into()),
        };
        s.snapshots.push(snap.clone());
        if s.lost_snapshot_responses > 0 {
            s.lost_snapshot_responses -= 1;
            return Err(CoreError::Transient("request timed out".into()));
        }
        Ok(snap)
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), CoreError> {
        let mut s = self.record(Call::DeleteSnapshot(snapshot_id.clone()))?;
        let before = s.snapshots.len();
        s.snapshots.retain(|x| &x.id != snapshot_id);
        if s.snapshots.len() == before {
            return Err(CoreError::NotFound(snapshot_id.to_string()));
        }
        Ok(())
    }

    fn create_volume(&self, input: &NewVolume) -> Result<VolumeId, CoreError> {
        let mut s = self.record(Call::CreateVolume(input.clone()))?;
        if !s.snapshots.iter().any(|x| x.id == input.snapshot_id) {
            return Err(CoreError::NotFound(input.snapshot_id.to_string()));
        }
        s.next_id += 1;
        let id = VolumeId(format!("vol-new{}", s.next_id));
        s.volumes.push(Volume {
            id: id.clone(),
            state: VolumeState::Creating,
            availability_zone: Some(input.availability_zone.clone()),
            attached_instances: Vec::new(),
            tags: input.tags.clone(),
        });
        Ok(id)
    }

    fn volume_state(&self, volume_id: &VolumeId) -> Result<VolumeState, CoreError> {
        let mut s = self.record(Call::VolumeState(volume_id.clone()))?;
        if let Some(left) = s.hidden_volumes.get_mut(volume_id) {
            if *left > 0 {
                *left -= 1;
                return Err(CoreError::NotFound(format!(
                    "InvalidVolume.NotFound {}",
                    volume_id
                )));
            }
        }
        if let Some(q) = s.volume_states.get_mut(volume_id) {
            if q.len() > 1 {
                if let Some(st) = q.pop_front() {
                    return Ok(st);
                }
            }
            if let Some(st) = q.front() {
                return Ok(st.clone());
            }
        }
        s.volumes
            .iter()
            .find(|v| &v.id == volume_id)
            .map(|v| v.state.clone())
            .ok_or_else(|| CoreError::NotFound(volume_id.to_string()))
    }

    fn attach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
        device: &str,
    ) -> Result<(), CoreError> {
        let mut s = self.record(Call::AttachVolume(
            volume_id.clone(),
            instance_id.clone(),
            device.to_string(),
        ))?;
        if let Some(err) = s.attach_failure.take() {
            return Err(err);
        }
        let vol = s
            .volumes
            .iter_mut()
            .find(|v| &v.id == volume_id)
            .ok_or_else(|| CoreError::NotFound(volume_id.to_string()))?;
        vol.attached_instances.push(instance_id.clone());
        vol.state = VolumeState::InUse;
        Ok(())
    }

    fn list_instances(&self) -> Result<Vec<InstanceId>, CoreError> {
        let s = self.record(Call::ListInstances)?;
        Ok(s.instances.clone())
    }

    fn create_tags(&self, instances: &[InstanceId], tag: &Tag) -> Result<(), CoreError> {
        let _s = self.record(Call::CreateTags(instances.to_vec(), tag.clone()))?;
        Ok(())
    }

    fn instance_statuses(&self, ids: &[InstanceId]) -> Result<Vec<InstanceStatus>, CoreError> {
        let mut s = self.record(Call::InstanceStatuses(ids.to_vec()))?;
        if ids.is_empty() {
            return Ok(s.statuses.clone());
        }
        let mut out = Vec::new();
        for id in ids {
            let scripted = match s.instance_states.get_mut(id) {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            };
            match scripted {
                Some(Some(state)) => out.push(InstanceStatus {
                    instance_id: id.clone(),
                    state,
                    instance_status: Some("initializing".into()),
                    system_status: Some("ok".into()),
                }),
                Some(None) => {}
                None => out.extend(s.statuses.iter().filter(|x| &x.instance_id == id).cloned()),
            }
        }
        Ok(out)
    }

    fn reboot_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError> {
        let _s = self.record(Call::RebootInstance(instance_id.clone()))?;
        Ok(())
    }
}

/// Notifier that remembers every alert.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::Transient("smtp unavailable".into()));
        }
        self.sent
            .lock()
            .map_err(|_| CoreError::Fatal("mutex poisoned".into()))?
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Remote shell that records commands and returns a canned output.
#[derive(Default)]
pub struct RecordingShell {
    commands: Mutex<Vec<String>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl RemoteShell for RecordingShell {
    fn run(&self, command: &str) -> Result<String, CoreError> {
        self.commands
            .lock()
            .map_err(|_| CoreError::Fatal("mutex poisoned".into()))?
            .push(command.to_string());
        Ok(command.rsplit(' ').next().unwrap_or_default().to_string())
    }
}

/// Probe returning a fixed result.
pub struct FixedProbe(pub Result<u16, CoreError>);

impl HealthProbe for FixedProbe {
    fn probe(&self) -> Result<u16, CoreError> {
        self.0.clone()
    }
}

/// Sleeper that returns immediately but remembers what it was asked to wait.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn calls(&self) -> usize {
        self.waits.lock().map(|v| v.len()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.waits
            .lock()
            .map(|v| v.iter().sum())
            .unwrap_or_default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, d: Duration) {
        if let Ok(mut w) = self.waits.lock() {
            w.push(d);
        }
    }
}

/// Manually driven clock; sleeping on it advances time instantly.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000))),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, d: Duration) {
        if let Ok(mut t) = self.now.lock() {
            *t += d;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now.lock().map(|t| *t).unwrap_or(UNIX_EPOCH)
    }
}

impl Sleeper for ManualClock {
    fn sleep(&self, d: Duration) {
        self.advance(d)
    }
}
