//! Domain library for the EC2 operations tools.
//!
//! This crate holds the transient cloud records, the ports (traits) the
//! programs talk through, the pure selection/classification logic, and the
//! short procedures each binary runs. Keep SDK clients, sockets and processes
//! out of this crate; they live in the adapter crates.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Identifier of a block-storage volume (e.g. `vol-0abc`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VolumeId(String);

/// Identifier of a volume snapshot (e.g. `snap-0abc`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SnapshotId(String);

/// Identifier of a compute instance (e.g. `i-0abc`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InstanceId(String);

macro_rules! resource_id {
    ($ty:ident, $prefix:literal, $what:literal) => {
        impl $ty {
            pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
                let val = s.into();
                if !val.starts_with($prefix) || val.len() == $prefix.len() {
                    return Err(CoreError::InvalidId(format!(
                        "{} id must look like {}<hex>, got {:?}",
                        $what, $prefix, val
                    )));
                }
                Ok(Self(val))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

resource_id!(VolumeId, "vol-", "volume");
resource_id!(SnapshotId, "snap-", "snapshot");
resource_id!(InstanceId, "i-", "instance");

/// A key/value label attached to a cloud resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Lifecycle state of a volume as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    Other(String),
}

impl VolumeState {
    pub fn as_str(&self) -> &str {
        match self {
            VolumeState::Creating => "creating",
            VolumeState::Available => "available",
            VolumeState::InUse => "in-use",
            VolumeState::Deleting => "deleting",
            VolumeState::Deleted => "deleted",
            VolumeState::Error => "error",
            VolumeState::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "creating" => VolumeState::Creating,
            "available" => VolumeState::Available,
            "in-use" => VolumeState::InUse,
            "deleting" => VolumeState::Deleting,
            "deleted" => VolumeState::Deleted,
            "error" => VolumeState::Error,
            other => VolumeState::Other(other.to_string()),
        }
    }
}

impl Display for VolumeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an instance as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Other(String),
}

impl InstanceState {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "shutting-down" => InstanceState::ShuttingDown,
            "terminated" => InstanceState::Terminated,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            other => InstanceState::Other(other.to_string()),
        }
    }
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block-storage volume record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub id: VolumeId,
    pub state: VolumeState,
    pub availability_zone: Option<String>,
    /// Instances this volume is attached to (usually zero or one).
    pub attached_instances: Vec<InstanceId>,
    pub tags: Vec<Tag>,
}

/// Point-in-time copy of a volume owned by the calling account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub volume_id: Option<VolumeId>,
    /// Time the snapshot was initiated; used for ordering.
    pub started_at: SystemTime,
    pub state: Option<String>,
}

/// Instance health summary as returned by the status API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    pub state: InstanceState,
    /// Instance reachability check summary (`ok`, `impaired`, `initializing`, ...).
    pub instance_status: Option<String>,
    /// Provider infrastructure check summary.
    pub system_status: Option<String>,
}

/// Selector used when listing volumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeFilter {
    /// Volumes carrying `tag:<key>=<value>`.
    Tagged(Tag),
    /// Volumes attached to the given instance.
    AttachedTo(InstanceId),
}

/// Input for creating a volume from a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVolume {
    pub snapshot_id: SnapshotId,
    pub availability_zone: String,
    pub tags: Vec<Tag>,
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Blocking wait abstraction so polling and scheduling can be tested without
/// real delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, d: Duration);
}

/// Wall clock backed by `SystemTime::now`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Sleeper that parks the current thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d)
    }
}

/// Port for the cloud compute control plane. All calls are region-scoped by
/// the implementation.
pub trait ComputeApi: Send + Sync {
    /// List volumes matching the filter.
    fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>, CoreError>;
    /// List snapshots owned by the calling account taken from the given volume.
    fn list_snapshots(&self, volume_id: &VolumeId) -> Result<Vec<Snapshot>, CoreError>;
    fn create_snapshot(&self, volume_id: &VolumeId) -> Result<Snapshot, CoreError>;
    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), CoreError>;
    fn create_volume(&self, input: &NewVolume) -> Result<VolumeId, CoreError>;
    /// Current state of a single volume.
    fn volume_state(&self, volume_id: &VolumeId) -> Result<VolumeState, CoreError>;
    fn attach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
        device: &str,
    ) -> Result<(), CoreError>;
    /// List every instance in the region.
    fn list_instances(&self) -> Result<Vec<InstanceId>, CoreError>;
    /// Apply one tag to every instance given.
    fn create_tags(&self, instances: &[InstanceId], tag: &Tag) -> Result<(), CoreError>;
    /// Status records; an empty `ids` slice means all instances, including
    /// those that are not running.
    fn instance_statuses(&self, ids: &[InstanceId]) -> Result<Vec<InstanceStatus>, CoreError>;
    fn reboot_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError>;
}

/// Port for sending a plaintext alert to the operator.
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str) -> Result<(), CoreError>;
}

/// Port for running one command on the monitored host.
pub trait RemoteShell: Send + Sync {
    /// Run the command and return its captured stdout.
    fn run(&self, command: &str) -> Result<String, CoreError>;
}

/// Port for probing the application endpoint. `Ok` carries the HTTP status of
/// any response received; `Err` means no response was obtained at all.
pub trait HealthProbe: Send + Sync {
    fn probe(&self) -> Result<u16, CoreError>;
}

/// Core domain errors (no external error crates to keep deps at zero).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    InvalidId(String),
    NotFound(String),
    /// Failure worth retrying: throttling, timeouts, dispatch and 5xx errors.
    Transient(String),
    /// Failure that will not go away by retrying.
    Fatal(String),
    /// A bounded wait ran out before the target was reached.
    Timeout {
        waited_for: String,
        attempts: u32,
        elapsed: Duration,
    },
    /// A step failed after a resource was created; the resource was left
    /// behind and needs manual cleanup.
    Orphaned {
        resource: String,
        cause: Box<CoreError>,
    },
}

impl CoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidId(msg) => write!(f, "invalid id: {}", msg),
            CoreError::NotFound(msg) => write!(f, "not found: {}", msg),
            CoreError::Transient(msg) => write!(f, "transient error: {}", msg),
            CoreError::Fatal(msg) => write!(f, "fatal error: {}", msg),
            CoreError::Timeout {
                waited_for,
                attempts,
                elapsed,
            } => write!(
                f,
                "timed out waiting for {} after {} attempts ({:.1}s)",
                waited_for,
                attempts,
                elapsed.as_secs_f64()
            ),
            CoreError::Orphaned { resource, cause } => {
                write!(f, "{} left behind: {}", resource, cause)
            }
        }
    }
}

impl Error for CoreError {}

/// Return a short about/version line for the binaries to log at startup.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{}", pkg, ver)
}

pub mod adapters;
pub mod backoff;
pub mod health;
pub mod poll;
pub mod retention;
pub mod retry;
pub mod schedule;
pub mod service;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_provider_prefixes() {
        let v = VolumeId::new("vol-0abc").expect("valid volume id");
        assert_eq!(v.as_str(), "vol-0abc");
        assert!(SnapshotId::new("snap-1").is_ok());
        assert!(InstanceId::new("i-04e7a8ab01a267cce").is_ok());
    }

    #[test]
    fn ids_reject_wrong_prefix_or_empty_suffix() {
        assert!(matches!(VolumeId::new("snap-1"), Err(CoreError::InvalidId(_))));
        assert!(matches!(InstanceId::new("i-"), Err(CoreError::InvalidId(_))));
        assert!(matches!(SnapshotId::new(""), Err(CoreError::InvalidId(_))));
    }

    #[test]
    fn states_parse_known_and_unknown_values() {
        assert_eq!(VolumeState::parse("in-use"), VolumeState::InUse);
        assert_eq!(VolumeState::parse("AVAILABLE"), VolumeState::Available);
        assert_eq!(
            VolumeState::parse("optimizing"),
            VolumeState::Other("optimizing".into())
        );
        assert_eq!(InstanceState::parse("running"), InstanceState::Running);
        assert_eq!(InstanceState::ShuttingDown.as_str(), "shutting-down");
    }

    #[test]
    fn only_transient_errors_are_transient() {
        assert!(CoreError::Transient("throttled".into()).is_transient());
        assert!(!CoreError::Fatal("denied".into()).is_transient());
        assert!(!CoreError::NotFound("vol".into()).is_transient());
        let orphaned = CoreError::Orphaned {
            resource: "vol-1".into(),
            cause: Box::new(CoreError::Transient("throttled".into())),
        };
        assert!(!orphaned.is_transient());
        assert_eq!(
            orphaned.to_string(),
            "vol-1 left behind: transient error: throttled"
        );
    }
}
