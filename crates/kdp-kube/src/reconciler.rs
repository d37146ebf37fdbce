//! Manifest Reconciler
//!
//! Applies a rendered manifest set to the cluster, one object at a time:
//!
//! - absent objects are created, stamped with their last-applied
//!   configuration unless excluded
//! - present objects receive a three-way merge patch guarded by the live
//!   `resourceVersion`, or nothing when they already match
//!
//! Dispatch stops at the first failure and leaves earlier objects applied.
//! Conflicts re-read the live object and recompute the patch under the
//! retry policy. Nothing is ever deleted from here.

use kdp_core::ObjectIdentity;
use kdp_engine::RenderedManifests;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::annotations::{
    clear_stale_last_applied, merge_common_metadata, merge_owner_references, read_last_applied,
    set_controller_owner, stamp_last_applied,
};
use crate::cluster::{ClusterApi, identity_of};
use crate::error::{KubeError, Result};
use crate::merge::{is_empty_patch, three_way_merge};
use crate::retry::{Deadline, RetryPolicy};

/// What happened to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyAction {
    Created,
    Patched,
    /// The live object already matched
    Unchanged,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyAction::Created => write!(f, "created"),
            ApplyAction::Patched => write!(f, "patched"),
            ApplyAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// One applied object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedResource {
    pub id: ObjectIdentity,
    pub action: ApplyAction,
}

/// Result of a dispatch, in manifest order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub applied: Vec<AppliedResource>,
}

impl DispatchSummary {
    pub fn created(&self) -> usize {
        self.count(ApplyAction::Created)
    }

    pub fn patched(&self) -> usize {
        self.count(ApplyAction::Patched)
    }

    pub fn unchanged(&self) -> usize {
        self.count(ApplyAction::Unchanged)
    }

    fn count(&self, action: ApplyAction) -> usize {
        self.applied.iter().filter(|r| r.action == action).count()
    }

    /// `namespace/Kind/name` of every applied object
    pub fn resources(&self) -> Vec<String> {
        self.applied.iter().map(|r| r.id.to_string()).collect()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} manifest(s) applied: {} created, {} patched, {} unchanged",
            self.applied.len(),
            self.created(),
            self.patched(),
            self.unchanged()
        )
    }
}

/// Metadata merged into every manifest before it is applied
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Set as the controller owner of every object
    pub owner: Option<ObjectIdentity>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub deadline: Deadline,
}

impl DispatchOptions {
    pub fn owned_by(owner: ObjectIdentity) -> Self {
        Self {
            owner: Some(owner),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Applies manifests to a cluster
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, retry: RetryPolicy) -> Self {
        Self { cluster, retry }
    }

    /// Apply every manifest in order, stopping at the first failure
    pub async fn dispatch(&self, manifests: &RenderedManifests, options: &DispatchOptions) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        for manifest in manifests {
            let mut object = manifest.object.clone();
            merge_common_metadata(&mut object, &options.labels, &options.annotations);
            if let Some(owner) = &options.owner {
                if !set_controller_owner(&mut object, owner) {
                    tracing::warn!(owner = %owner, "owner has no uid, skipping owner reference");
                }
            }

            let id = identity_of(&object)?;
            let action = self.apply(object, options.deadline).await?;
            summary.applied.push(AppliedResource { id, action });
        }

        tracing::debug!(summary = %summary.summary(), "dispatch finished");
        Ok(summary)
    }

    /// Create or patch one object
    pub async fn apply(&self, mut desired: JsonValue, deadline: Deadline) -> Result<ApplyAction> {
        let id = identity_of(&desired)?;
        stamp_last_applied(&mut desired)?;

        let resource = id.to_string();
        let cluster = self.cluster.as_ref();
        let desired = &desired;
        let target = &id;

        self.retry
            .run(&resource, deadline, move |attempt| async move {
                match cluster.get(target).await? {
                    None => {
                        cluster.create(desired).await?;
                        tracing::info!(resource = %target, "created");
                        Ok(ApplyAction::Created)
                    }
                    Some(live) => {
                        let Some(patch) = patch_for(desired, &live) else {
                            tracing::debug!(resource = %target, "up to date");
                            return Ok(ApplyAction::Unchanged);
                        };
                        cluster.patch(target, &patch).await?;
                        tracing::info!(resource = %target, attempt, "patched");
                        Ok(ApplyAction::Patched)
                    }
                }
            })
            .await
            .map_err(|e| KubeError::apply("apply", &resource, e))
    }
}

/// Merge patch taking `live` to `desired`, pinned to the live resource version
///
/// None when the live object already matches.
fn patch_for(desired: &JsonValue, live: &JsonValue) -> Option<JsonValue> {
    let last_applied = read_last_applied(live);
    let mut desired = desired.clone();
    merge_owner_references(&mut desired, live, last_applied.as_ref());

    let mut patch = three_way_merge(last_applied.as_ref(), &desired, live);
    clear_stale_last_applied(&mut patch, live);
    if is_empty_patch(&patch) {
        return None;
    }

    if let Some(version) = live.pointer("/metadata/resourceVersion").cloned() {
        if let JsonValue::Object(root) = &mut patch {
            let metadata = root
                .entry("metadata")
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if let JsonValue::Object(metadata) = metadata {
                metadata.insert("resourceVersion".to_string(), version);
            }
        }
    }
    Some(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::LAST_APPLIED;
    use crate::mock::{ClusterOperationCounts, MockCluster};
    use kdp_engine::RenderedManifest;
    use serde_json::json;

    fn manifests(objects: Vec<JsonValue>) -> RenderedManifests {
        objects
            .into_iter()
            .map(|object| RenderedManifest {
                output_name: None,
                object,
            })
            .collect()
    }

    fn deployment(replicas: u32) -> JsonValue {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "flink", "namespace": "admin"},
            "spec": {"replicas": replicas}
        })
    }

    fn config_map() -> JsonValue {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "app-config", "namespace": "kdp-test"},
            "data": {"host": "zk:2181"}
        })
    }

    fn reconciler(cluster: &MockCluster) -> Reconciler {
        Reconciler::new(Arc::new(cluster.clone()), RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_absent_object_is_created() {
        let cluster = MockCluster::new();
        let summary = reconciler(&cluster)
            .dispatch(&manifests(vec![deployment(1)]), &DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.created(), 1);
        assert_eq!(
            cluster.operation_counts(),
            ClusterOperationCounts {
                gets: 1,
                creates: 1,
                patches: 0
            }
        );

        let id = identity_of(&deployment(1)).unwrap();
        let stored = cluster.object(&id).unwrap();
        assert_eq!(read_last_applied(&stored).unwrap(), deployment(1));
    }

    #[tokio::test]
    async fn test_present_object_is_patched() {
        let cluster = MockCluster::with_objects(vec![deployment(1)]).unwrap();
        let summary = reconciler(&cluster)
            .dispatch(&manifests(vec![deployment(3)]), &DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.patched(), 1);
        assert_eq!(
            cluster.operation_counts(),
            ClusterOperationCounts {
                gets: 1,
                creates: 0,
                patches: 1
            }
        );

        let stored = cluster.object(&identity_of(&deployment(3)).unwrap()).unwrap();
        assert_eq!(stored["spec"]["replicas"], 3);
        assert_eq!(stored["metadata"]["resourceVersion"], "2");
    }

    #[tokio::test]
    async fn test_excluded_kind_never_carries_last_applied() {
        let cluster = MockCluster::new();
        let rec = reconciler(&cluster);
        let options = DispatchOptions::default();

        rec.dispatch(&manifests(vec![config_map()]), &options).await.unwrap();
        rec.dispatch(&manifests(vec![config_map()]), &options).await.unwrap();

        let mut changed = config_map();
        changed["data"]["host"] = json!("zk:2182");
        rec.dispatch(&manifests(vec![changed]), &options).await.unwrap();

        let stored = cluster.object(&identity_of(&config_map()).unwrap()).unwrap();
        assert!(stored.pointer(&format!("/metadata/annotations/{}", LAST_APPLIED.replace('/', "~1"))).is_none());
        assert_eq!(stored["data"]["host"], "zk:2182");
        assert_eq!(cluster.operation_counts().creates, 1);
        assert_eq!(cluster.operation_counts().patches, 1);
    }

    #[tokio::test]
    async fn test_matching_object_is_not_patched() {
        let cluster = MockCluster::new();
        let rec = reconciler(&cluster);
        let owner = ObjectIdentity::new("bdc.kdp.io/v1alpha1", "Application", "flink").with_uid("1234");
        let options = DispatchOptions::owned_by(owner).with_label("bdc.kdp.io/name", "admin");

        rec.dispatch(&manifests(vec![deployment(1), config_map()]), &options)
            .await
            .unwrap();
        let summary = rec
            .dispatch(&manifests(vec![deployment(1), config_map()]), &options)
            .await
            .unwrap();

        assert_eq!(summary.unchanged(), 2);
        assert_eq!(summary.summary(), "2 manifest(s) applied: 0 created, 0 patched, 2 unchanged");
        assert_eq!(cluster.operation_counts().patches, 0);
    }

    #[tokio::test]
    async fn test_foreign_owner_references_survive_patch() {
        let mut live = deployment(1);
        live["metadata"]["ownerReferences"] = json!([
            {"apiVersion": "v1", "kind": "ConfigMap", "name": "backup", "uid": "9999"}
        ]);
        let cluster = MockCluster::with_objects(vec![live]).unwrap();
        let owner = ObjectIdentity::new("bdc.kdp.io/v1alpha1", "Application", "flink").with_uid("1234");

        reconciler(&cluster)
            .dispatch(&manifests(vec![deployment(2)]), &DispatchOptions::owned_by(owner))
            .await
            .unwrap();

        let stored = cluster.object(&identity_of(&deployment(2)).unwrap()).unwrap();
        let uids: Vec<&str> = stored["metadata"]["ownerReferences"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uid"].as_str().unwrap())
            .collect();
        assert_eq!(uids, vec!["9999", "1234"]);
        assert_eq!(stored["spec"]["replicas"], 2);
    }

    #[tokio::test]
    async fn test_fields_removed_from_template_are_deleted() {
        let cluster = MockCluster::new();
        let rec = reconciler(&cluster);

        let mut first = deployment(1);
        first["spec"]["paused"] = json!(true);
        rec.apply(first, None).await.unwrap();
        rec.apply(deployment(1), None).await.unwrap();

        let stored = cluster.object(&identity_of(&deployment(1)).unwrap()).unwrap();
        assert!(stored["spec"].get("paused").is_none());
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_with_fresh_reads() {
        let cluster = MockCluster::with_objects(vec![deployment(1)]).unwrap();
        cluster.inject_conflicts(2);

        let action = reconciler(&cluster).apply(deployment(2), None).await.unwrap();
        assert_eq!(action, ApplyAction::Patched);
        assert_eq!(
            cluster.operation_counts(),
            ClusterOperationCounts {
                gets: 3,
                creates: 0,
                patches: 3
            }
        );
    }

    #[tokio::test]
    async fn test_unresolved_conflict() {
        let cluster = MockCluster::with_objects(vec![deployment(1)]).unwrap();
        cluster.inject_conflicts(10);

        let err = reconciler(&cluster).apply(deployment(2), None).await.unwrap_err();
        assert!(matches!(err, KubeError::ConflictUnresolved { attempts: 3, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_owner_and_common_labels() {
        let cluster = MockCluster::new();
        let owner = ObjectIdentity::new("bdc.kdp.io/v1alpha1", "Application", "flink").with_uid("1234");
        let options = DispatchOptions::owned_by(owner).with_label("bdc.kdp.io/name", "admin");

        reconciler(&cluster)
            .dispatch(&manifests(vec![deployment(1)]), &options)
            .await
            .unwrap();

        let stored = cluster.object(&identity_of(&deployment(1)).unwrap()).unwrap();
        assert_eq!(stored["metadata"]["labels"]["bdc.kdp.io/name"], "admin");
        assert_eq!(stored["metadata"]["ownerReferences"][0]["uid"], "1234");
        assert_eq!(stored["metadata"]["ownerReferences"][0]["controller"], true);
    }

    #[tokio::test]
    async fn test_first_error_stops_dispatch() {
        let cluster = MockCluster::new();
        let broken = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}});

        let err = reconciler(&cluster)
            .dispatch(&manifests(vec![deployment(1), broken, config_map()]), &DispatchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::InvalidManifest(_)));
        // the first object stays applied, the third is never attempted
        assert_eq!(cluster.object_count(), 1);
    }
}
