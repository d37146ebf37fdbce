//! ContextSetting and ContextSecret CRDs
//!
//! Shared, typed settings of a group (a Zookeeper address, an HDFS
//! endpoint, credentials) that definitions list into dynamic enums.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::augment::SourceItem;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bdc.kdp.io",
    version = "v1alpha1",
    kind = "ContextSetting",
    shortname = "cs"
)]
#[serde(rename_all = "camelCase")]
pub struct ContextSettingSpec {
    /// Sub-type of the setting (e.g. "zookeeper")
    #[serde(default, rename = "type")]
    pub sub_type: String,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bdc.kdp.io",
    version = "v1alpha1",
    kind = "ContextSecret",
    shortname = "csec"
)]
#[serde(rename_all = "camelCase")]
pub struct ContextSecretSpec {
    /// Sub-type of the secret (e.g. "mysql")
    #[serde(default, rename = "type")]
    pub sub_type: String,

    /// Non-sensitive properties (e.g. the name of the backing Secret)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl From<&ContextSetting> for SourceItem {
    fn from(setting: &ContextSetting) -> Self {
        SourceItem {
            name: setting.name_any(),
            sub_type: setting.spec.sub_type.clone(),
            properties: setting.spec.properties.clone(),
        }
    }
}

impl From<&ContextSecret> for SourceItem {
    fn from(secret: &ContextSecret) -> Self {
        SourceItem {
            name: secret.name_any(),
            sub_type: secret.spec.sub_type.clone(),
            properties: secret.spec.properties.clone(),
        }
    }
}
