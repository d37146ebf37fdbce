//! Platform configuration
//!
//! Every field is defaulted, so an empty document (or no file at all)
//! yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{KubeError, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformConfig {
    /// Namespace holding platform objects such as the definition mapping
    pub system_namespace: String,

    /// ConfigMap mapping `{type}-{kind}` keys to definition names
    pub mapping_config_map: String,

    /// Label selector of ConfigMaps merged into every render context
    pub settings_label: String,

    /// Length of the generated `shortId` context value; 0 disables it
    pub short_id_length: usize,

    /// Field manager recorded on created and patched objects
    pub field_manager: String,

    pub retry: RetryPolicy,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            system_namespace: "kdp-system".to_string(),
            mapping_config_map: "xdefinition-mapping".to_string(),
            settings_label: "kdp.io/context-setting=true".to_string(),
            short_id_length: 8,
            field_manager: "kdp".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PlatformConfig {
    /// Parse configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, defaulting when it does not exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.system_namespace.is_empty() || self.mapping_config_map.is_empty() {
            return Err(KubeError::InvalidConfig(
                "systemNamespace and mappingConfigMap must not be empty".to_string(),
            ));
        }
        if self.field_manager.is_empty() {
            return Err(KubeError::InvalidConfig("fieldManager must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::from_yaml("").unwrap();
        assert_eq!(config, PlatformConfig::default());
        assert_eq!(config.short_id_length, 8);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_partial_document() {
        let config = PlatformConfig::from_yaml(
            "systemNamespace: platform\nretry:\n  maxAttempts: 3\n",
        )
        .unwrap();
        assert_eq!(config.system_namespace, "platform");
        assert_eq!(config.mapping_config_map, "xdefinition-mapping");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 100);
    }

    #[test]
    fn test_invalid() {
        let err = PlatformConfig::from_yaml("fieldManager: \"\"\n").unwrap_err();
        assert!(matches!(err, KubeError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shortIdLength: 6").unwrap();

        let config = PlatformConfig::load_from(file.path()).unwrap();
        assert_eq!(config.short_id_length, 6);

        let dir = tempfile::tempdir().unwrap();
        let missing = PlatformConfig::load_from(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(missing, PlatformConfig::default());
    }
}
