//! EC2 adapter implementing the `ComputeApi` port.
//!
//! Backed by `aws-sdk-ec2`, one client per region.
//! - Describe calls follow pagination tokens until the listing is complete.
//! - Snapshot listings are restricted to snapshots owned by the calling account.
//! - SDK errors are classified into transient (throttling, timeouts, dispatch
//!   and 5xx-style service errors) and fatal ones, so callers can decide
//!   whether to retry.
//!
//! Notes:
//! - The domain `ComputeApi` trait is synchronous. We bridge to the async AWS
//!   SDK using an internal `tokio::runtime::Runtime` and `block_on`.

use std::sync::Arc;
use std::time::SystemTime;

use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::{DisplayErrorContext, SdkError};
use aws_sdk_ec2::types::{self as ec2, Filter, ResourceType, TagSpecification};
use aws_sdk_ec2::Client;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use domain::{
    ComputeApi, CoreError, InstanceId, InstanceState, InstanceStatus, NewVolume, Snapshot,
    SnapshotId, Tag, Volume, VolumeFilter, VolumeId, VolumeState,
};
use tracing::debug;

/// `ComputeApi` backed by the EC2 control plane of a single region.
///
/// Supports both standalone mode (creates its own Tokio runtime) and embedded
/// mode (reuses the existing runtime via `Handle::current()`).
#[derive(Clone)]
pub struct Ec2Compute {
    region: String,
    client: Client,
    // None when constructed inside a running Tokio runtime
    rt: Option<Arc<tokio::runtime::Runtime>>,
}

impl Ec2Compute {
    /// Create from an existing SDK client.
    pub fn with_client(region: impl Into<String>, client: Client) -> Result<Self, CoreError> {
        let rt = Self::maybe_create_runtime()?;
        Ok(Self {
            region: region.into(),
            client,
            rt,
        })
    }

    /// Create a client for `region` using the default credential chain
    /// (env, profile, IMDS).
    pub fn for_region(region: &str) -> Result<Self, CoreError> {
        let rt = Self::maybe_create_runtime()?;
        let loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        let conf = Self::block_on_with_rt(&rt, loader.load());
        let client = Client::new(&conf);
        Ok(Self {
            region: region.to_string(),
            client,
            rt,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn maybe_create_runtime() -> Result<Option<Arc<tokio::runtime::Runtime>>, CoreError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            Ok(None)
        } else {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| CoreError::Fatal(format!("tokio runtime init: {e}")))?;
            Ok(Some(Arc::new(rt)))
        }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        Self::block_on_with_rt(&self.rt, fut)
    }

    fn block_on_with_rt<F: std::future::Future>(
        rt: &Option<Arc<tokio::runtime::Runtime>>,
        fut: F,
    ) -> F::Output {
        match rt {
            Some(rt) => rt.block_on(fut),
            None => tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut)),
        }
    }
}

impl ComputeApi for Ec2Compute {
    fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>, CoreError> {
        let f = volume_filter(filter);
        let fut = async {
            self.client
                .describe_volumes()
                .filters(f)
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
        };
        let volumes = self.block_on(fut).map_err(map_sdk_err)?;
        debug!(region = %self.region, count = volumes.len(), ?filter, "described volumes");
        volumes.iter().map(volume_to_domain).collect()
    }

    fn list_snapshots(&self, volume_id: &VolumeId) -> Result<Vec<Snapshot>, CoreError> {
        let f = Filter::builder()
            .name("volume-id")
            .values(volume_id.as_str())
            .build();
        let fut = async {
            self.client
                .describe_snapshots()
                .owner_ids("self")
                .filters(f)
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
        };
        let snapshots = self.block_on(fut).map_err(map_sdk_err)?;
        snapshots.iter().map(snapshot_to_domain).collect()
    }

    fn create_snapshot(&self, volume_id: &VolumeId) -> Result<Snapshot, CoreError> {
        let fut = async {
            self.client
                .create_snapshot()
                .volume_id(volume_id.as_str())
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        Ok(Snapshot {
            id: SnapshotId::new(out.snapshot_id().unwrap_or_default())?,
            volume_id: out.volume_id().and_then(|v| VolumeId::new(v).ok()),
            started_at: start_time(out.start_time())?,
            state: out.state().map(|s| s.as_str().to_string()),
        })
    }

    fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), CoreError> {
        let fut = async {
            self.client
                .delete_snapshot()
                .snapshot_id(snapshot_id.as_str())
                .send()
                .await
        };
        self.block_on(fut).map_err(map_sdk_err)?;
        Ok(())
    }

    fn create_volume(&self, input: &NewVolume) -> Result<VolumeId, CoreError> {
        let mut req = self
            .client
            .create_volume()
            .snapshot_id(input.snapshot_id.as_str())
            .availability_zone(input.availability_zone.as_str());
        if !input.tags.is_empty() {
            req = req.tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Volume)
                    .set_tags(Some(input.tags.iter().map(sdk_tag).collect()))
                    .build(),
            );
        }
        let out = self.block_on(req.send()).map_err(map_sdk_err)?;
        VolumeId::new(out.volume_id().unwrap_or_default())
    }

    fn volume_state(&self, volume_id: &VolumeId) -> Result<VolumeState, CoreError> {
        let fut = async {
            self.client
                .describe_volumes()
                .volume_ids(volume_id.as_str())
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        out.volumes()
            .first()
            .and_then(|v| v.state())
            .map(|s| VolumeState::parse(s.as_str()))
            .ok_or_else(|| CoreError::NotFound(volume_id.to_string()))
    }

    fn attach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
        device: &str,
    ) -> Result<(), CoreError> {
        let fut = async {
            self.client
                .attach_volume()
                .volume_id(volume_id.as_str())
                .instance_id(instance_id.as_str())
                .device(device)
                .send()
                .await
        };
        self.block_on(fut).map_err(map_sdk_err)?;
        Ok(())
    }

    fn list_instances(&self) -> Result<Vec<InstanceId>, CoreError> {
        let fut = async {
            self.client
                .describe_instances()
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
        };
        let reservations = self.block_on(fut).map_err(map_sdk_err)?;
        Ok(reservations
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(|i| i.instance_id())
            .filter_map(|id| InstanceId::new(id).ok())
            .collect())
    }

    fn create_tags(&self, instances: &[InstanceId], tag: &Tag) -> Result<(), CoreError> {
        let resources: Vec<String> = instances.iter().map(|i| i.as_str().to_string()).collect();
        let fut = async {
            self.client
                .create_tags()
                .set_resources(Some(resources))
                .tags(sdk_tag(tag))
                .send()
                .await
        };
        self.block_on(fut).map_err(map_sdk_err)?;
        Ok(())
    }

    fn instance_statuses(&self, ids: &[InstanceId]) -> Result<Vec<InstanceStatus>, CoreError> {
        let ids: Option<Vec<String>> = if ids.is_empty() {
            None
        } else {
            Some(ids.iter().map(|i| i.as_str().to_string()).collect())
        };
        let fut = async {
            self.client
                .describe_instance_status()
                .include_all_instances(true)
                .set_instance_ids(ids)
                .into_paginator()
                .items()
                .send()
                .try_collect()
                .await
        };
        let statuses = self.block_on(fut).map_err(map_sdk_err)?;
        statuses.iter().map(status_to_domain).collect()
    }

    fn reboot_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError> {
        let fut = async {
            self.client
                .reboot_instances()
                .instance_ids(instance_id.as_str())
                .send()
                .await
        };
        self.block_on(fut).map_err(map_sdk_err)?;
        Ok(())
    }
}

// -------------------------
// Error classification
// -------------------------

/// Service error codes that are worth retrying.
fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        "RequestLimitExceeded"
            | "Throttling"
            | "ThrottlingException"
            | "RequestThrottled"
            | "InternalError"
            | "InternalFailure"
            | "ServiceUnavailable"
            | "Unavailable"
    )
}

fn map_sdk_err<E, R>(e: SdkError<E, R>) -> CoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let msg = format!("ec2 error: {}", DisplayErrorContext(&e));
    match &e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            CoreError::Transient(msg)
        }
        SdkError::ServiceError(_) => match e.code() {
            Some(code) if is_transient_code(code) => CoreError::Transient(msg),
            Some(code) if code.ends_with(".NotFound") => CoreError::NotFound(msg),
            _ => CoreError::Fatal(msg),
        },
        _ => CoreError::Fatal(msg),
    }
}

// -------------------------
// Conversions
// -------------------------

fn volume_filter(filter: &VolumeFilter) -> Filter {
    match filter {
        VolumeFilter::Tagged(tag) => Filter::builder()
            .name(format!("tag:{}", tag.key))
            .values(tag.value.as_str())
            .build(),
        VolumeFilter::AttachedTo(instance) => Filter::builder()
            .name("attachment.instance-id")
            .values(instance.as_str())
            .build(),
    }
}

fn sdk_tag(tag: &Tag) -> ec2::Tag {
    ec2::Tag::builder()
        .key(tag.key.as_str())
        .value(tag.value.as_str())
        .build()
}

fn start_time(t: Option<&aws_smithy_types::DateTime>) -> Result<SystemTime, CoreError> {
    let t = t.ok_or_else(|| CoreError::Fatal("snapshot without start time".into()))?;
    SystemTime::try_from(*t).map_err(|e| CoreError::Fatal(format!("snapshot start time: {e}")))
}

fn volume_to_domain(v: &ec2::Volume) -> Result<Volume, CoreError> {
    Ok(Volume {
        id: VolumeId::new(v.volume_id().unwrap_or_default())?,
        state: v
            .state()
            .map(|s| VolumeState::parse(s.as_str()))
            .unwrap_or_else(|| VolumeState::Other("unknown".into())),
        availability_zone: v.availability_zone().map(str::to_string),
        attached_instances: v
            .attachments()
            .iter()
            .filter_map(|a| a.instance_id())
            .filter_map(|i| InstanceId::new(i).ok())
            .collect(),
        tags: v
            .tags()
            .iter()
            .map(|t| Tag::new(t.key().unwrap_or_default(), t.value().unwrap_or_default()))
            .collect(),
    })
}

fn snapshot_to_domain(s: &ec2::Snapshot) -> Result<Snapshot, CoreError> {
    Ok(Snapshot {
        id: SnapshotId::new(s.snapshot_id().unwrap_or_default())?,
        volume_id: s.volume_id().and_then(|v| VolumeId::new(v).ok()),
        started_at: start_time(s.start_time())?,
        state: s.state().map(|st| st.as_str().to_string()),
    })
}

fn status_to_domain(s: &ec2::InstanceStatus) -> Result<InstanceStatus, CoreError> {
    Ok(InstanceStatus {
        instance_id: InstanceId::new(s.instance_id().unwrap_or_default())?,
        state: s
            .instance_state()
            .and_then(|st| st.name())
            .map(|n| InstanceState::parse(n.as_str()))
            .unwrap_or_else(|| InstanceState::Other("unknown".into())),
        instance_status: s
            .instance_status()
            .and_then(|st| st.status())
            .map(|st| st.as_str().to_string()),
        system_status: s
            .system_status()
            .and_then(|st| st.status())
            .map(|st| st.as_str().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::operation::delete_snapshot::DeleteSnapshotError;
    use aws_smithy_types::error::ErrorMetadata;
    use aws_smithy_types::DateTime;
    use std::time::{Duration, UNIX_EPOCH};

    fn service_err(code: &str) -> SdkError<DeleteSnapshotError, ()> {
        SdkError::service_error(
            DeleteSnapshotError::generic(
                ErrorMetadata::builder().code(code).message("boom").build(),
            ),
            (),
        )
    }

    #[test]
    fn throttling_and_timeouts_are_transient() {
        assert!(map_sdk_err(service_err("RequestLimitExceeded")).is_transient());
        assert!(map_sdk_err(service_err("InternalError")).is_transient());
        let timeout: SdkError<DeleteSnapshotError, ()> = SdkError::timeout_error("took too long");
        assert!(map_sdk_err(timeout).is_transient());
    }

    #[test]
    fn auth_and_missing_resources_are_not_retried() {
        assert!(matches!(
            map_sdk_err(service_err("UnauthorizedOperation")),
            CoreError::Fatal(_)
        ));
        assert!(matches!(
            map_sdk_err(service_err("InvalidSnapshot.NotFound")),
            CoreError::NotFound(_)
        ));
    }

    #[test]
    fn snapshot_conversion_keeps_start_time() {
        let s = ec2::Snapshot::builder()
            .snapshot_id("snap-0123")
            .volume_id("vol-0abc")
            .start_time(DateTime::from_secs(1_700_000_000))
            .state(ec2::SnapshotState::Completed)
            .build();
        let d = snapshot_to_domain(&s).unwrap();
        assert_eq!(d.id.as_str(), "snap-0123");
        assert_eq!(d.volume_id.unwrap().as_str(), "vol-0abc");
        assert_eq!(d.started_at, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert_eq!(d.state.as_deref(), Some("completed"));
    }

    #[test]
    fn snapshot_without_start_time_is_rejected() {
        let s = ec2::Snapshot::builder().snapshot_id("snap-1").build();
        assert!(snapshot_to_domain(&s).is_err());
    }

    #[test]
    fn volume_conversion_reads_attachments_and_tags() {
        let v = ec2::Volume::builder()
            .volume_id("vol-1")
            .state(ec2::VolumeState::InUse)
            .availability_zone("us-east-1a")
            .attachments(ec2::VolumeAttachment::builder().instance_id("i-9").build())
            .tags(ec2::Tag::builder().key("Environment").value("dev").build())
            .build();
        let d = volume_to_domain(&v).unwrap();
        assert_eq!(d.state, VolumeState::InUse);
        assert_eq!(d.attached_instances, vec![InstanceId::new("i-9").unwrap()]);
        assert_eq!(d.tags, vec![Tag::new("Environment", "dev")]);
    }

    #[test]
    fn status_conversion_reads_nested_summaries() {
        let s = ec2::InstanceStatus::builder()
            .instance_id("i-1")
            .instance_state(
                ec2::InstanceState::builder()
                    .name(ec2::InstanceStateName::Running)
                    .build(),
            )
            .instance_status(
                ec2::InstanceStatusSummary::builder()
                    .status(ec2::SummaryStatus::Ok)
                    .build(),
            )
            .system_status(
                ec2::InstanceStatusSummary::builder()
                    .status(ec2::SummaryStatus::Impaired)
                    .build(),
            )
            .build();
        let d = status_to_domain(&s).unwrap();
        assert_eq!(d.state, InstanceState::Running);
        assert_eq!(d.instance_status.as_deref(), Some("ok"));
        assert_eq!(d.system_status.as_deref(), Some("impaired"));
    }

    #[test]
    fn tag_filter_uses_tag_prefix() {
        let f = volume_filter(&VolumeFilter::Tagged(Tag::new("Environment", "dev")));
        assert_eq!(f.name(), Some("tag:Environment"));
        assert_eq!(f.values(), &["dev".to_string()]);
    }
}
