//! Shared settings merged into render contexts
//!
//! Settings live in ConfigMaps carrying a discriminator label in the
//! group's namespace. Their `data` maps are handed to the context builder,
//! which merges them in the order listed here, later wins.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Client, ResourceExt,
    api::{Api, ListParams},
};
use std::collections::BTreeMap;

use crate::error::Result;

/// Source of shared key/value settings
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Data maps of every settings object matching `label_selector`
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<BTreeMap<String, String>>>;
}

/// Lists labeled ConfigMaps
pub struct KubeSettingsSource {
    client: Client,
}

impl KubeSettingsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SettingsSource for KubeSettingsSource {
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let mut config_maps = api.list(&ListParams::default().labels(label_selector)).await?.items;

        // Name order makes the later-wins merge reproducible
        config_maps.sort_by_key(|cm| cm.name_any());
        tracing::debug!(%namespace, count = config_maps.len(), "shared settings listed");

        Ok(config_maps
            .into_iter()
            .map(|cm| cm.data.unwrap_or_default())
            .collect())
    }
}
