//! Environment tagging of every instance in a region.

use serde::Serialize;

use crate::{ComputeApi, CoreError, InstanceId, Tag};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagReport {
    pub tag: Tag,
    pub tagged: Vec<InstanceId>,
}

/// Apply `tag` to every instance the API lists. An empty region skips the
/// tagging call entirely (the provider rejects an empty resource list).
pub fn tag_instances(api: &dyn ComputeApi, tag: &Tag) -> Result<TagReport, CoreError> {
    let instances = api.list_instances()?;
    if !instances.is_empty() {
        api.create_tags(&instances, tag)?;
    }
    Ok(TagReport {
        tag: tag.clone(),
        tagged: instances,
    })
}
