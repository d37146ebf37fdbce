//! Definition Registry
//!
//! Resolves a `(kind, type)` pair to a [`Definition`]:
//!
//! 1. look up the mapping key `"{type}-{kind}"` (`"default-{kind}"` for an
//!    empty type) and load the definition it names
//! 2. if the mapping names a missing definition, load a definition named
//!    after the type itself
//! 3. otherwise (including no mapping at all) fail with
//!    [`KubeError::DefinitionNotFound`]
//!
//! Store errors are returned as they are. Resolved definitions are cached
//! until [`DefinitionRegistry::invalidate`] is called.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kdp_core::Definition;
use kube::{
    Client,
    api::{Api, ListParams},
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::crds::XDefinition;
use crate::error::{KubeError, Result};
use crate::retry::{Deadline, within};

/// Backing store of definitions and the type mapping
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Definition name registered under a mapping key
    async fn get_mapping(&self, key: &str) -> Result<Option<String>>;

    async fn get_definition(&self, name: &str) -> Result<Option<Definition>>;

    async fn list_definitions(&self) -> Result<Vec<Definition>>;
}

/// Store reading the mapping ConfigMap and `XDefinition` objects
pub struct KubeDefinitionStore {
    client: Client,
    namespace: String,
    mapping: String,
}

impl KubeDefinitionStore {
    pub fn new(client: Client, namespace: &str, mapping_config_map: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            mapping: mapping_config_map.to_string(),
        }
    }
}

#[async_trait]
impl DefinitionStore for KubeDefinitionStore {
    async fn get_mapping(&self, key: &str) -> Result<Option<String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let Some(config_map) = api.get_opt(&self.mapping).await? else {
            tracing::warn!(namespace = %self.namespace, name = %self.mapping, "definition mapping is missing");
            return Ok(None);
        };
        Ok(config_map.data.and_then(|mut data| data.remove(key)))
    }

    async fn get_definition(&self, name: &str) -> Result<Option<Definition>> {
        let api: Api<XDefinition> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.as_ref().map(Definition::from))
    }

    async fn list_definitions(&self) -> Result<Vec<Definition>> {
        let api: Api<XDefinition> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(Definition::from).collect())
    }
}

/// Resolves and caches definitions
pub struct DefinitionRegistry {
    store: Arc<dyn DefinitionStore>,
    cache: RwLock<HashMap<(String, String), Arc<Definition>>>,
}

impl DefinitionRegistry {
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the definition rendering `kind` objects of `type_hint`
    pub async fn resolve(&self, kind: &str, type_hint: &str, deadline: Deadline) -> Result<Arc<Definition>> {
        let cache_key = (kind.to_string(), type_hint.to_string());
        if let Some(hit) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(&cache_key) {
            return Ok(Arc::clone(hit));
        }

        let definition = Arc::new(within(deadline, "definition lookup", self.lookup(kind, type_hint)).await?);
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cache_key, Arc::clone(&definition));
        Ok(definition)
    }

    async fn lookup(&self, kind: &str, type_hint: &str) -> Result<Definition> {
        let key = Definition::mapping_key(kind, type_hint);

        let Some(name) = self.store.get_mapping(&key).await? else {
            return Err(KubeError::DefinitionNotFound { key });
        };
        if let Some(definition) = self.store.get_definition(&name).await? {
            tracing::debug!(%key, definition = %definition.name, "definition resolved through mapping");
            return Ok(definition);
        }

        tracing::debug!(%key, %name, "mapped definition is missing, falling back to the type name");
        if !type_hint.is_empty() {
            if let Some(definition) = self.store.get_definition(type_hint).await? {
                tracing::debug!(%key, definition = %definition.name, "definition resolved by type name");
                return Ok(definition);
            }
        }

        Err(KubeError::DefinitionNotFound { key })
    }

    /// All stored definitions, bypassing the cache
    pub async fn list(&self, deadline: Deadline) -> Result<Vec<Definition>> {
        within(deadline, "definition list", self.store.list_definitions()).await
    }

    /// Drop every cached resolution
    pub fn invalidate(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
