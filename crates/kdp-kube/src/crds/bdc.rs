//! BigDataCluster CRD
//!
//! The tenant group owning applications and shared settings.

use kdp_core::GroupInfo;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bdc.kdp.io",
    version = "v1alpha1",
    kind = "BigDataCluster",
    shortname = "bdc",
    status = "BigDataClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BigDataClusterSpec {
    /// Namespace cluster-scoped applications of this group render into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Set by operators to pause the group controller; the render pipeline does not read it
    #[serde(default)]
    pub frozen: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BigDataClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl BigDataCluster {
    /// Identity handed to the context builder
    pub fn group_info(&self) -> GroupInfo {
        GroupInfo {
            name: self.name_any(),
            default_namespace: self
                .spec
                .default_namespace
                .clone()
                .or_else(|| Some(self.name_any())),
            labels: self.labels().clone(),
            annotations: self.annotations().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_info_defaults_namespace_to_name() {
        let mut bdc = BigDataCluster::new("admin", BigDataClusterSpec::default());
        bdc.metadata.labels = Some([("bdc.kdp.io/org".to_string(), "kdp".to_string())].into());

        let group = bdc.group_info();
        assert_eq!(group.name, "admin");
        assert_eq!(group.default_namespace.as_deref(), Some("admin"));
        assert_eq!(group.labels["bdc.kdp.io/org"], "kdp");

        bdc.spec.default_namespace = Some("kdp-data".to_string());
        assert_eq!(bdc.group_info().default_namespace.as_deref(), Some("kdp-data"));
    }
}
