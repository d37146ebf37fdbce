//! In-memory collaborators for testing
//!
//! Each mock records operation counts for assertions, so tests can check
//! exactly which calls the pipeline issued without a cluster.

use async_trait::async_trait;
use kdp_core::{Definition, ObjectIdentity};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::augment::{EnumSource, SourceItem};
use crate::cluster::{ClusterApi, identity_of};
use crate::error::{KubeError, Result};
use crate::merge::apply_merge_patch;
use crate::registry::DefinitionStore;
use crate::retry::Deadline;
use crate::settings::SettingsSource;
use crate::status::{Condition, StatusWriter};

/// Build an API server error response
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}

/// Counts of cluster operations performed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClusterOperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
}

/// In-memory cluster
///
/// Objects are keyed by their identity. Creates set `resourceVersion` to
/// "1", patches bump it and reject a stale `metadata.resourceVersion` with
/// a 409 like the API server does.
#[derive(Clone, Default)]
pub struct MockCluster {
    objects: Arc<RwLock<BTreeMap<String, JsonValue>>>,
    operations: Arc<RwLock<ClusterOperationCounts>>,
    pending_conflicts: Arc<RwLock<u32>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-existing objects
    pub fn with_objects(objects: Vec<JsonValue>) -> Result<Self> {
        let cluster = Self::new();
        {
            let mut store = cluster.objects.write().unwrap_or_else(|e| e.into_inner());
            for mut object in objects {
                let id = identity_of(&object)?;
                if object.pointer("/metadata/resourceVersion").is_none() {
                    object["metadata"]["resourceVersion"] = json!("1");
                }
                store.insert(id.to_string(), object);
            }
        }
        Ok(cluster)
    }

    /// Make the next `count` patches fail with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        *self.pending_conflicts.write().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> ClusterOperationCounts {
        self.operations.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stored object, if any
    pub fn object(&self, id: &ObjectIdentity) -> Option<JsonValue> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id.to_string())
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn count(&self, f: impl FnOnce(&mut ClusterOperationCounts)) {
        f(&mut *self.operations.write().unwrap_or_else(|e| e.into_inner()));
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get(&self, id: &ObjectIdentity) -> Result<Option<JsonValue>> {
        self.count(|ops| ops.gets += 1);
        Ok(self.object(id))
    }

    async fn create(&self, object: &JsonValue) -> Result<JsonValue> {
        self.count(|ops| ops.creates += 1);
        let key = identity_of(object)?.to_string();

        let mut store = self.objects.write().unwrap_or_else(|e| e.into_inner());
        if store.contains_key(&key) {
            return Err(KubeError::Api(api_error(409, "AlreadyExists")));
        }
        let mut created = object.clone();
        created["metadata"]["resourceVersion"] = json!("1");
        store.insert(key, created.clone());
        Ok(created)
    }

    async fn patch(&self, id: &ObjectIdentity, patch: &JsonValue) -> Result<JsonValue> {
        self.count(|ops| ops.patches += 1);
        {
            let mut pending = self.pending_conflicts.write().unwrap_or_else(|e| e.into_inner());
            if *pending > 0 {
                *pending -= 1;
                return Err(KubeError::Api(api_error(409, "Conflict")));
            }
        }

        let mut store = self.objects.write().unwrap_or_else(|e| e.into_inner());
        let Some(live) = store.get_mut(&id.to_string()) else {
            return Err(KubeError::Api(api_error(404, "NotFound")));
        };

        let current: u64 = live
            .pointer("/metadata/resourceVersion")
            .and_then(JsonValue::as_str)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(JsonValue::as_str) {
            if expected != current.to_string() {
                return Err(KubeError::Api(api_error(409, "Conflict")));
            }
        }

        apply_merge_patch(live, patch);
        live["metadata"]["resourceVersion"] = json!((current + 1).to_string());
        Ok(live.clone())
    }
}

/// Counts of definition store operations performed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreOperationCounts {
    pub mapping_gets: usize,
    pub definition_gets: usize,
    pub lists: usize,
}

/// In-memory definition store
///
/// Inserting a definition also maps its `api_resource` key to its name.
#[derive(Clone, Default)]
pub struct MemoryDefinitionStore {
    definitions: Arc<RwLock<BTreeMap<String, Definition>>>,
    mapping: Arc<RwLock<BTreeMap<String, String>>>,
    operations: Arc<RwLock<StoreOperationCounts>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: Vec<Definition>) -> Self {
        let store = Self::new();
        for definition in definitions {
            store.insert(definition);
        }
        store
    }

    pub fn insert(&self, definition: Definition) {
        if !definition.api_resource.kind.is_empty() {
            self.set_mapping(&definition.api_resource.mapping_key(), &definition.name);
        }
        self.definitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(definition.name.clone(), definition);
    }

    pub fn set_mapping(&self, key: &str, name: &str) {
        self.mapping
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), name.to_string());
    }

    /// Make every later call fail with a 503 carrying `message`
    pub fn fail_with(&self, message: &str) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    pub fn operation_counts(&self) -> StoreOperationCounts {
        self.operations.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check(&self, f: impl FnOnce(&mut StoreOperationCounts)) -> Result<()> {
        f(&mut *self.operations.write().unwrap_or_else(|e| e.into_inner()));
        match self.failure.read().unwrap_or_else(|e| e.into_inner()).as_deref() {
            Some(message) => Err(KubeError::Api(api_error(503, message))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn get_mapping(&self, key: &str) -> Result<Option<String>> {
        self.check(|ops| ops.mapping_gets += 1)?;
        Ok(self.mapping.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    async fn get_definition(&self, name: &str) -> Result<Option<Definition>> {
        self.check(|ops| ops.definition_gets += 1)?;
        Ok(self
            .definitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<Definition>> {
        self.check(|ops| ops.lists += 1)?;
        Ok(self
            .definitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }
}

/// Shared settings returned as configured, whatever the selector
#[derive(Clone, Default)]
pub struct StaticSettingsSource {
    settings: Vec<BTreeMap<String, String>>,
    lists: Arc<RwLock<usize>>,
}

impl StaticSettingsSource {
    pub fn new(settings: Vec<BTreeMap<String, String>>) -> Self {
        Self {
            settings,
            lists: Arc::default(),
        }
    }

    pub fn list_count(&self) -> usize {
        *self.lists.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SettingsSource for StaticSettingsSource {
    async fn list(&self, _namespace: &str, _label_selector: &str) -> Result<Vec<BTreeMap<String, String>>> {
        *self.lists.write().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(self.settings.clone())
    }
}

/// Enum source items per kind
#[derive(Clone, Default)]
pub struct StaticEnumSource {
    items: HashMap<String, Vec<SourceItem>>,
    lists: Arc<RwLock<usize>>,
}

impl StaticEnumSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: &str, items: Vec<SourceItem>) -> Self {
        self.items.entry(kind.to_string()).or_default().extend(items);
        self
    }

    pub fn list_count(&self) -> usize {
        *self.lists.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EnumSource for StaticEnumSource {
    async fn list(&self, source_kind: &str, _scope: &str) -> Result<Vec<SourceItem>> {
        *self.lists.write().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(self.items.get(source_kind).cloned().unwrap_or_default())
    }
}

/// Records written conditions
#[derive(Clone, Default)]
pub struct MemoryStatusWriter {
    written: Arc<RwLock<Vec<(ObjectIdentity, Condition)>>>,
}

impl MemoryStatusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<(ObjectIdentity, Condition)> {
        self.written.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Last condition written for a subject
    pub fn last(&self, subject: &ObjectIdentity) -> Option<Condition> {
        self.written
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(id, _)| id == subject)
            .map(|(_, condition)| condition.clone())
    }
}

#[async_trait]
impl StatusWriter for MemoryStatusWriter {
    async fn write(&self, subject: &ObjectIdentity, condition: &Condition, _deadline: Deadline) -> Result<()> {
        self.written
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.clone(), condition.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map() -> JsonValue {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "app-config", "namespace": "kdp-test"},
            "data": {"host": "zk:2181"}
        })
    }

    #[tokio::test]
    async fn test_create_then_patch() {
        let cluster = MockCluster::new();
        let id = identity_of(&config_map()).unwrap();

        assert!(cluster.get(&id).await.unwrap().is_none());
        cluster.create(&config_map()).await.unwrap();
        assert!(cluster.create(&config_map()).await.unwrap_err().is_conflict());

        let patched = cluster
            .patch(&id, &json!({"metadata": {"resourceVersion": "1"}, "data": {"host": null, "port": "2181"}}))
            .await
            .unwrap();
        assert_eq!(patched["data"], json!({"port": "2181"}));
        assert_eq!(patched["metadata"]["resourceVersion"], "2");

        // stale resource version
        let err = cluster
            .patch(&id, &json!({"metadata": {"resourceVersion": "1"}}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(
            cluster.operation_counts(),
            ClusterOperationCounts {
                gets: 1,
                creates: 2,
                patches: 2
            }
        );
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let cluster = MockCluster::with_objects(vec![config_map()]).unwrap();
        let id = identity_of(&config_map()).unwrap();
        cluster.inject_conflicts(1);

        assert!(cluster.patch(&id, &json!({})).await.unwrap_err().is_conflict());
        assert!(cluster.patch(&id, &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure() {
        let store = MemoryDefinitionStore::new();
        store.fail_with("unavailable");
        let err = store.get_definition("x").await.unwrap_err();
        assert!(matches!(err, KubeError::Api(kube::Error::Api(ref resp)) if resp.code == 503));
    }
}
