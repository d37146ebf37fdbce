//! Definition documents
//!
//! A definition describes how one subject kind (optionally narrowed by a
//! type hint) renders into cluster manifests, and which input schema its
//! users fill in.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Type hint used when a subject does not carry one
pub const DEFAULT_TYPE: &str = "default";

/// Which orchestration object a definition renders for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceRef {
    /// API version of the subject kind (e.g. "bdc.kdp.io/v1alpha1")
    #[serde(default)]
    pub api_version: String,

    /// Subject kind (e.g. "Application")
    pub kind: String,

    /// Sub-type of the kind (e.g. "flink"); empty for the default definition
    #[serde(default, rename = "type")]
    pub type_hint: String,
}

impl ApiResourceRef {
    /// Key under which this definition is registered
    pub fn mapping_key(&self) -> String {
        Definition::mapping_key(&self.kind, &self.type_hint)
    }
}

/// A schema field whose permitted values are listed from related objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicParameter {
    /// Dot-separated path of the target field (e.g. "dependencies.zookeeper")
    pub name: String,

    /// Kind of the objects to list (e.g. "ContextSetting")
    pub source_kind: String,

    /// Sub-type the listed objects must carry (e.g. "zookeeper")
    #[serde(default)]
    pub source_sub_type: String,

    /// Property projected out of each object; the object name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_property_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A stored definition document, read-only to the render pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// Definition name in the backing store
    pub name: String,

    /// Subject kind and type this definition renders
    #[serde(default)]
    pub api_resource: ApiResourceRef,

    /// Template body, including its `parameter:` declaration block
    pub template: String,

    /// Template producing a human-readable status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,

    /// Expression deciding whether the rendered workload is healthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_policy: Option<String>,

    /// Fields whose enums are populated from related objects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_parameters: Vec<DynamicParameter>,
}

impl Definition {
    /// Create a definition with only a name and a template
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            ..Default::default()
        }
    }

    /// Set the subject kind and type this definition renders
    pub fn for_resource(mut self, kind: &str, type_hint: &str) -> Self {
        self.api_resource.kind = kind.to_string();
        self.api_resource.type_hint = type_hint.to_string();
        self
    }

    /// Build the mapping key for a `(kind, type_hint)` pair
    ///
    /// `"{type_hint}-{kind}"`, or `"default-{kind}"` when the hint is empty.
    pub fn mapping_key(kind: &str, type_hint: &str) -> String {
        let hint = if type_hint.is_empty() {
            DEFAULT_TYPE
        } else {
            type_hint
        };
        format!("{}-{}", hint, kind)
    }

    /// Parse a definition document from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let definition: Definition = serde_yaml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check the fields the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::MissingField {
                field: "name".to_string(),
            });
        }
        if self.template.trim().is_empty() {
            return Err(CoreError::InvalidDefinition {
                name: self.name.clone(),
                message: "template is empty".to_string(),
            });
        }
        for param in &self.dynamic_parameters {
            if param.name.is_empty() || param.source_kind.is_empty() {
                return Err(CoreError::InvalidDefinition {
                    name: self.name.clone(),
                    message: "dynamic parameters need a name and a source kind".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_key() {
        assert_eq!(Definition::mapping_key("Application", "flink"), "flink-Application");
        assert_eq!(Definition::mapping_key("Application", ""), "default-Application");
    }

    #[test]
    fn test_from_yaml() {
        let definition = Definition::from_yaml(
            r#"
name: flink
apiResource:
  kind: Application
  type: flink
template: |
  output:
    kind: ConfigMap
healthPolicy: "output.status.ready"
dynamicParameters:
  - name: dependencies.zookeeper
    sourceKind: ContextSetting
    sourceSubType: zookeeper
    sourcePropertyKey: hostname
"#,
        )
        .unwrap();

        assert_eq!(definition.api_resource.mapping_key(), "flink-Application");
        assert_eq!(definition.dynamic_parameters.len(), 1);
        assert_eq!(
            definition.dynamic_parameters[0].source_property_key.as_deref(),
            Some("hostname")
        );
        assert!(definition.custom_status.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_template() {
        let definition = Definition::new("broken", "   ");
        assert!(matches!(
            definition.validate(),
            Err(CoreError::InvalidDefinition { .. })
        ));
    }
}
