//! Dynamic Enum Augmenter
//!
//! Some schema fields take their permitted values from objects living in
//! the cluster, e.g. "which Zookeeper setting should this Kafka use". Each
//! [`DynamicParameter`] names the field, the kind and sub-type of the
//! objects to list, and optionally the property to project out of them.
//! The listed values are appended to the field's `enum`.

use async_trait::async_trait;
use futures::future::try_join_all;
use kdp_core::DynamicParameter;
use kube::{
    Client,
    api::{Api, ListParams},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use crate::crds::{ContextSecret, ContextSetting};
use crate::error::Result;
use crate::retry::{Deadline, within};

/// One object an enum value may come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub name: String,
    #[serde(rename = "type")]
    pub sub_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl SourceItem {
    pub fn new(name: &str, sub_type: &str) -> Self {
        Self {
            name: name.to_string(),
            sub_type: sub_type.to_string(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

/// Lists the objects enum values are taken from
#[async_trait]
pub trait EnumSource: Send + Sync {
    /// Objects of `source_kind` matching the label selector `scope`
    async fn list(&self, source_kind: &str, scope: &str) -> Result<Vec<SourceItem>>;
}

/// Lists `ContextSetting` and `ContextSecret` objects
pub struct KubeEnumSource {
    client: Client,
}

impl KubeEnumSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EnumSource for KubeEnumSource {
    async fn list(&self, source_kind: &str, scope: &str) -> Result<Vec<SourceItem>> {
        let params = ListParams::default().labels(scope);
        let items = match source_kind {
            "ContextSetting" => {
                let api: Api<ContextSetting> = Api::all(self.client.clone());
                api.list(&params).await?.items.iter().map(SourceItem::from).collect()
            }
            "ContextSecret" => {
                let api: Api<ContextSecret> = Api::all(self.client.clone());
                api.list(&params).await?.items.iter().map(SourceItem::from).collect()
            }
            other => {
                tracing::warn!(kind = %other, "no enum source for kind");
                Vec::new()
            }
        };
        Ok(items)
    }
}

/// Values a descriptor selects out of listed items, in listing order
pub fn select_values(descriptor: &DynamicParameter, items: &[SourceItem]) -> Vec<String> {
    items
        .iter()
        .filter(|item| descriptor.source_sub_type.is_empty() || item.sub_type == descriptor.source_sub_type)
        .filter_map(|item| match &descriptor.source_property_key {
            None => Some(item.name.clone()),
            Some(key) => item.properties.get(key).cloned(),
        })
        .collect()
}

/// Append values to the `enum` of the field at a dotted path
///
/// Missing `properties` containers and field nodes along the path are
/// created. Values already present are skipped.
pub fn inject_enum(schema: &mut JsonValue, path: &str, values: &[String]) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    inject_at(schema, &segments, values);
}

fn inject_at(node: &mut JsonValue, segments: &[&str], values: &[String]) {
    let JsonValue::Object(object) = ensure_object(node) else {
        return;
    };
    match segments.split_first() {
        Some((first, rest)) => {
            let properties = object
                .entry("properties")
                .or_insert_with(|| JsonValue::Object(Map::new()));
            let JsonValue::Object(properties) = ensure_object(properties) else {
                return;
            };
            let child = properties
                .entry(first.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            inject_at(child, rest, values);
        }
        None => {
            let entry = object
                .entry("enum")
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            if !entry.is_array() {
                *entry = JsonValue::Array(Vec::new());
            }
            if let JsonValue::Array(existing) = entry {
                for value in values {
                    let value = JsonValue::String(value.clone());
                    if !existing.contains(&value) {
                        existing.push(value);
                    }
                }
            }
        }
    }
}

fn ensure_object(node: &mut JsonValue) -> &mut JsonValue {
    if !node.is_object() {
        *node = JsonValue::Object(Map::new());
    }
    node
}

/// Augment a schema with enums listed from the cluster
///
/// Listings run concurrently; values are merged in descriptor order into a
/// copy of `schema`. Augmenting an already augmented schema with the same
/// inputs returns it unchanged.
pub async fn augment(
    schema: &JsonValue,
    descriptors: &[DynamicParameter],
    scope: &str,
    source: &dyn EnumSource,
    deadline: Deadline,
) -> Result<JsonValue> {
    let listings = try_join_all(
        descriptors
            .iter()
            .map(|d| within(deadline, "enum source listing", source.list(&d.source_kind, scope))),
    )
    .await?;

    let mut augmented = schema.clone();
    for (descriptor, items) in descriptors.iter().zip(&listings) {
        let values = select_values(descriptor, items);
        if values.is_empty() {
            tracing::debug!(field = %descriptor.name, kind = %descriptor.source_kind, "no enum values listed");
            continue;
        }
        inject_enum(&mut augmented, &descriptor.name, &values);
    }
    Ok(augmented)
}
