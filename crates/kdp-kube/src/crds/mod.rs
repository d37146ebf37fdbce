//! Custom resources of the platform
//!
//! - [`BigDataCluster`]: the group owning applications and settings
//! - [`Application`]: a renderable subject
//! - [`ContextSetting`] / [`ContextSecret`]: shared settings listed into
//!   dynamic enums
//! - [`XDefinition`]: a stored definition document

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

mod application;
mod bdc;
mod context;
mod xdefinition;

pub use application::{Application, ApplicationSpec, ApplicationStatus};
pub use bdc::{BigDataCluster, BigDataClusterSpec, BigDataClusterStatus};
pub use context::{ContextSecret, ContextSecretSpec, ContextSetting, ContextSettingSpec};
pub use xdefinition::{
    ApiResourceSpec, DefinitionResource, DynamicParameterSpec, Schematic, StatusRules,
    TemplateSource, XDefinition, XDefinitionSpec,
};

/// Label naming the group (big data cluster) an object belongs to
pub const GROUP_LABEL: &str = "bdc.kdp.io/name";

/// CRD manifests of every kind above
pub fn all() -> Vec<CustomResourceDefinition> {
    vec![
        BigDataCluster::crd(),
        Application::crd(),
        ContextSetting::crd(),
        ContextSecret::crd(),
        XDefinition::crd(),
    ]
}

/// Schema for free-form property maps
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}
