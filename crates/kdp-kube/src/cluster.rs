//! Cluster apply surface
//!
//! [`ClusterApi`] is the narrow interface the reconciler drives: get,
//! create and merge-patch of arbitrary kinds addressed by
//! [`ObjectIdentity`]. [`KubeCluster`] implements it over the API server,
//! resolving kinds through discovery.

use async_trait::async_trait;
use kdp_core::ObjectIdentity;
use kube::{
    Client,
    api::{Api, DynamicObject, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery, Scope},
};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::error::{KubeError, Result};

/// Operations the reconciler needs from a cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object; None when it does not exist
    async fn get(&self, id: &ObjectIdentity) -> Result<Option<JsonValue>>;

    /// Create an object, returning it as stored
    async fn create(&self, object: &JsonValue) -> Result<JsonValue>;

    /// Apply a JSON merge patch, returning the patched object
    async fn patch(&self, id: &ObjectIdentity, patch: &JsonValue) -> Result<JsonValue>;
}

/// Identity of a rendered object
pub fn identity_of(object: &JsonValue) -> Result<ObjectIdentity> {
    let field = |pointer: &str| object.pointer(pointer).and_then(JsonValue::as_str);
    let (Some(api_version), Some(kind)) = (field("/apiVersion"), field("/kind")) else {
        return Err(KubeError::InvalidManifest("missing apiVersion or kind".to_string()));
    };
    let name = field("/metadata/name")
        .ok_or_else(|| KubeError::InvalidManifest(format!("{} without metadata.name", kind)))?;

    let mut id = ObjectIdentity::new(api_version, kind, name);
    id.namespace = field("/metadata/namespace").map(str::to_string);
    Ok(id)
}

/// Split an apiVersion into group and version
pub fn gvk_of(id: &ObjectIdentity) -> GroupVersionKind {
    let (group, version) = match id.api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", id.api_version.as_str()),
    };
    GroupVersionKind::gvk(group, version, &id.kind)
}

/// [`ClusterApi`] over a live API server
pub struct KubeCluster {
    client: Client,
    discovery: RwLock<Discovery>,
    field_manager: String,
}

impl KubeCluster {
    /// Connect and run discovery
    pub async fn new(client: Client, field_manager: &str) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(KubeError::Api)?;

        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
            field_manager: field_manager.to_string(),
        })
    }

    /// Re-run discovery, picking up kinds installed since the last run
    pub async fn refresh_discovery(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(KubeError::Api)?;
        *self.discovery.write().await = discovery;
        Ok(())
    }

    async fn api_for(&self, id: &ObjectIdentity) -> Result<Api<DynamicObject>> {
        let gvk = gvk_of(id);
        let mut resolved = self.discovery.read().await.resolve_gvk(&gvk);
        if resolved.is_none() {
            // kinds installed after startup are missing until rediscovered
            tracing::debug!(resource = %id, "kind not discovered, refreshing discovery");
            self.refresh_discovery().await?;
            resolved = self.discovery.read().await.resolve_gvk(&gvk);
        }
        let (resource, capabilities): (ApiResource, _) = resolved.ok_or_else(|| {
            KubeError::InvalidManifest(format!("unknown resource type {}/{}", id.api_version, id.kind))
        })?;

        match (capabilities.scope, &id.namespace) {
            (Scope::Namespaced, Some(ns)) => Ok(Api::namespaced_with(self.client.clone(), ns, &resource)),
            (Scope::Namespaced, None) => Err(KubeError::InvalidManifest(format!(
                "{} is namespaced but has no metadata.namespace",
                id
            ))),
            (Scope::Cluster, _) => Ok(Api::all_with(self.client.clone(), &resource)),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, id: &ObjectIdentity) -> Result<Option<JsonValue>> {
        let api = self.api_for(id).await?;
        match api.get_opt(&id.name).await.map_err(KubeError::Api)? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, object: &JsonValue) -> Result<JsonValue> {
        let id = identity_of(object)?;
        let api = self.api_for(&id).await?;
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        let created = api
            .create(&self.post_params(), &object)
            .await
            .map_err(KubeError::Api)?;
        Ok(serde_json::to_value(created)?)
    }

    async fn patch(&self, id: &ObjectIdentity, patch: &JsonValue) -> Result<JsonValue> {
        let api = self.api_for(id).await?;
        let patched = api
            .patch(&id.name, &self.patch_params(), &Patch::Merge(patch))
            .await
            .map_err(KubeError::Api)?;
        Ok(serde_json::to_value(patched)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_of() {
        let id = identity_of(&json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "flink", "namespace": "admin"}
        }))
        .unwrap();
        assert_eq!(id.to_string(), "admin/Deployment/flink");

        let gvk = gvk_of(&id);
        assert_eq!((gvk.group.as_str(), gvk.version.as_str()), ("apps", "v1"));

        let core = ObjectIdentity::new("v1", "ConfigMap", "x");
        assert_eq!(gvk_of(&core).group, "");
    }

    #[test]
    fn test_identity_requires_name() {
        let err = identity_of(&json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}})).unwrap_err();
        assert!(matches!(err, KubeError::InvalidManifest(_)));
    }
}
