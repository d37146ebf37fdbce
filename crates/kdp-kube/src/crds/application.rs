//! Application CRD
//!
//! An application is the subject users create: a type picking the
//! definition plus free-form properties bound to `parameter`.

use kdp_core::{ObjectIdentity, Parameters, Subject};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crds::GROUP_LABEL;
use crate::status::Condition;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bdc.kdp.io",
    version = "v1alpha1",
    kind = "Application",
    shortname = "app",
    status = "ApplicationStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Definition sub-type (e.g. "flink"); empty selects the default definition
    #[serde(default, rename = "type")]
    pub type_hint: String,

    /// User parameters
    #[serde(default)]
    #[schemars(schema_with = "crate::crds::preserve_unknown_fields")]
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation the conditions were computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Objects created or patched by the last successful reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_resources: Vec<String>,
}

impl Subject for Application {
    fn identity(&self) -> ObjectIdentity {
        let mut identity = ObjectIdentity::new(
            &Application::api_version(&()),
            &Application::kind(&()),
            &self.name_any(),
        );
        identity.namespace = self.namespace();
        identity.uid = self.uid();
        identity
    }

    fn owner(&self) -> Option<String> {
        self.labels().get(GROUP_LABEL).cloned()
    }

    fn type_hint(&self) -> String {
        self.spec.type_hint.clone()
    }

    fn template_parameters(&self) -> Parameters {
        Parameters::from_value(self.spec.properties.clone()).unwrap_or_else(|err| {
            tracing::warn!(application = %self.name_any(), %err, "ignoring malformed properties");
            Parameters::new()
        })
    }
}
