//! Instance status listing and its one-line-per-instance rendering.

use crate::{ComputeApi, CoreError, InstanceStatus};

/// Printed after every status listing.
pub const STATUS_SEPARATOR: &str = "#############################";

/// Status of every instance in the region, including stopped ones.
pub fn collect_statuses(api: &dyn ComputeApi) -> Result<Vec<InstanceStatus>, CoreError> {
    api.instance_statuses(&[])
}

/// One human-readable line per instance.
pub fn status_line(s: &InstanceStatus) -> String {
    format!(
        "Instance {} is {} with instance status {} and system status {}",
        s.instance_id,
        s.state,
        s.instance_status.as_deref().unwrap_or("unknown"),
        s.system_status.as_deref().unwrap_or("unknown"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_cloud::{Call, InMemoryCloud};
    use crate::{InstanceId, InstanceState};

    #[test]
    fn lists_all_instances_including_stopped() {
        let cloud = InMemoryCloud::new();
        cloud.add_instance("i-1", InstanceState::Running);
        cloud.add_instance("i-2", InstanceState::Stopped);
        let statuses = collect_statuses(&cloud).unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(cloud.calls(), vec![Call::InstanceStatuses(vec![])]);
    }

    #[test]
    fn formats_a_status_line() {
        let s = InstanceStatus {
            instance_id: InstanceId::new("i-0abc").unwrap(),
            state: InstanceState::Running,
            instance_status: Some("ok".into()),
            system_status: None,
        };
        assert_eq!(
            status_line(&s),
            "Instance i-0abc is running with instance status ok and system status unknown"
        );
    }
}
