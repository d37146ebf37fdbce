//! XDefinition CRD
//!
//! The stored form of a [`Definition`]. The registry reads these objects
//! and converts them; the render pipeline never writes them.

use kdp_core::{ApiResourceRef, Definition, DynamicParameter};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "core.kdp.io",
    version = "v1alpha1",
    kind = "XDefinition",
    shortname = "xdef"
)]
#[serde(rename_all = "camelCase")]
pub struct XDefinitionSpec {
    pub api_resource: ApiResourceSpec,

    pub schematic: Schematic,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_parameter_meta: Vec<DynamicParameterSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusRules>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceSpec {
    pub definition: DefinitionResource,
}

/// Subject kind and type the definition renders for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionResource {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    #[serde(default, rename = "type")]
    pub type_hint: String,
}

/// Template holder; the `cue` key is the historical name of the slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Schematic {
    pub cue: TemplateSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateSource {
    pub template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_policy: Option<String>,
}

/// Field whose enum is listed from related objects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynamicParameterSpec {
    /// Dot-separated path of the schema field
    pub name: String,
    /// Kind of the listed objects
    #[serde(rename = "type")]
    pub source_kind: String,
    /// Sub-type the listed objects must carry
    #[serde(default, rename = "refType")]
    pub source_sub_type: String,
    /// Property to project; the object name when absent
    #[serde(default, rename = "refKey", skip_serializing_if = "Option::is_none")]
    pub source_property_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&DynamicParameterSpec> for DynamicParameter {
    fn from(spec: &DynamicParameterSpec) -> Self {
        DynamicParameter {
            name: spec.name.clone(),
            source_kind: spec.source_kind.clone(),
            source_sub_type: spec.source_sub_type.clone(),
            source_property_key: spec
                .source_property_key
                .clone()
                .filter(|key| !key.is_empty()),
            description: spec.description.clone(),
        }
    }
}

impl From<&XDefinition> for Definition {
    fn from(xdef: &XDefinition) -> Self {
        let resource = &xdef.spec.api_resource.definition;
        let status = xdef.spec.status.clone().unwrap_or_default();
        Definition {
            name: xdef.name_any(),
            api_resource: ApiResourceRef {
                api_version: resource.api_version.clone(),
                kind: resource.kind.clone(),
                type_hint: resource.type_hint.clone(),
            },
            template: xdef.spec.schematic.cue.template.clone(),
            custom_status: status.custom_status,
            health_policy: status.health_policy,
            dynamic_parameters: xdef
                .spec
                .dynamic_parameter_meta
                .iter()
                .map(DynamicParameter::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
apiVersion: core.kdp.io/v1alpha1
kind: XDefinition
metadata:
  name: flink-session
spec:
  apiResource:
    definition:
      apiVersion: bdc.kdp.io/v1alpha1
      kind: Application
      type: flink
  schematic:
    cue:
      template: |
        parameter:
          replicas: *1 | int
        output:
          kind: Deployment
  dynamicParameterMeta:
    - name: dependencies.zookeeper
      type: ContextSetting
      refType: zookeeper
      refKey: ""
  status:
    healthPolicy: "output.status.readyReplicas == 1"
"#;

    #[test]
    fn test_convert_to_definition() {
        let xdef: XDefinition = serde_yaml::from_str(DOCUMENT).unwrap();
        let definition = Definition::from(&xdef);

        assert_eq!(definition.name, "flink-session");
        assert_eq!(definition.api_resource.mapping_key(), "flink-Application");
        assert!(definition.template.starts_with("parameter:"));
        assert_eq!(
            definition.health_policy.as_deref(),
            Some("output.status.readyReplicas == 1")
        );
        assert_eq!(definition.custom_status, None);

        let dynamic = &definition.dynamic_parameters[0];
        assert_eq!(dynamic.name, "dependencies.zookeeper");
        assert_eq!(dynamic.source_kind, "ContextSetting");
        assert_eq!(dynamic.source_sub_type, "zookeeper");
        assert_eq!(dynamic.source_property_key, None);

        definition.validate().unwrap();
    }
}
