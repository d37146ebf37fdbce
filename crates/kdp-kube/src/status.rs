//! Status conditions reported on subjects
//!
//! Every reconcile ends with a `Ready` condition on the subject: `True`
//! with reason `Applied`, or `False` with a reason code and the error text.
//! Applied manifests whose health policy fails report `False` with reason
//! `Unhealthy`.

use async_trait::async_trait;
use kdp_core::ObjectIdentity;
use kube::{
    Client,
    api::{Api, DynamicObject, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::ApiResource,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{KubeError, Result};
use crate::retry::{Deadline, within};

/// Condition type set by the pipeline
pub const READY: &str = "Ready";

/// Machine-readable reason of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionReason {
    /// Every manifest was created or patched
    Applied,
    /// Manifests were applied but the health policy is not satisfied
    Unhealthy,
    DefinitionNotFound,
    TemplateCompileFailed,
    TemplateEvaluationFailed,
    TemplateNotConcrete,
    ApplyConflict,
    ApplyFailed,
    Timeout,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Applied => "Applied",
            ConditionReason::Unhealthy => "Unhealthy",
            ConditionReason::DefinitionNotFound => "DefinitionNotFound",
            ConditionReason::TemplateCompileFailed => "TemplateCompileFailed",
            ConditionReason::TemplateEvaluationFailed => "TemplateEvaluationFailed",
            ConditionReason::TemplateNotConcrete => "TemplateNotConcrete",
            ConditionReason::ApplyConflict => "ApplyConflict",
            ConditionReason::ApplyFailed => "ApplyFailed",
            ConditionReason::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True" or "False"
    pub status: String,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
    /// RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Successful reconcile
    pub fn ready(message: impl Into<String>) -> Self {
        Self::new(true, ConditionReason::Applied, message.into())
    }

    /// Applied, but the primary object fails its health policy
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(false, ConditionReason::Unhealthy, message.into())
    }

    /// Failed reconcile, reason and message taken from the error
    pub fn failed(error: &KubeError) -> Self {
        Self::new(false, error.reason(), error.to_string())
    }

    fn new(ready: bool, reason: ConditionReason, message: String) -> Self {
        Self {
            type_: READY.to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            reason,
            message,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == "True"
    }
}

/// Writes conditions back to subjects
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write(&self, subject: &ObjectIdentity, condition: &Condition, deadline: Deadline) -> Result<()>;
}

/// Patches the `status` subresource through the API server
pub struct KubeStatusWriter {
    client: Client,
    field_manager: String,
}

impl KubeStatusWriter {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
        }
    }

    fn api(&self, subject: &ObjectIdentity) -> Api<DynamicObject> {
        let (group, version) = match subject.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", subject.api_version.as_str()),
        };
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &subject.kind));
        match &subject.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write(&self, subject: &ObjectIdentity, condition: &Condition, deadline: Deadline) -> Result<()> {
        let patch = serde_json::json!({ "status": { "conditions": [condition] } });
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let api = self.api(subject);

        within(deadline, "status update", async {
            api.patch_status(&subject.name, &params, &Patch::Merge(&patch))
                .await
                .map_err(KubeError::Api)
        })
        .await?;

        tracing::debug!(subject = %subject, reason = %condition.reason, "status written");
        Ok(())
    }
}
