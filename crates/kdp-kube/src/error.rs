//! Error types for kdp-kube

use kdp_engine::{EngineError, RenderError, RenderErrorKind, SchemaError};
use thiserror::Error;

use crate::status::ConditionReason;

/// Result type for kdp-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while resolving, rendering or applying definitions
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// No mapping and no definition for a `(kind, type)` pair
    #[error("definition for '{key}' not found")]
    DefinitionNotFound { key: String },

    /// An object the pipeline depends on is absent
    #[error("{kind} '{name}' not found")]
    ObjectNotFound { kind: String, name: String },

    /// Optimistic concurrency conflicts outlasted the retry policy
    #[error("conflict on {resource} unresolved after {attempts} attempt(s)")]
    ConflictUnresolved { resource: String, attempts: u32 },

    /// Applying one manifest failed
    #[error("failed to {operation} {resource}: {source}")]
    Apply {
        operation: &'static str,
        resource: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Template rendering error
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Schema derivation error
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Status policy error
    #[error("status policy error: {0}")]
    Policy(String),

    /// Core type error (invalid definition, parameters)
    #[error(transparent)]
    Core(#[from] kdp_core::CoreError),

    /// A caller-supplied deadline expired
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<EngineError> for KubeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Render(err) => KubeError::Render(err),
            EngineError::Schema(err) => KubeError::Schema(err),
            EngineError::Policy { message } => KubeError::Policy(message),
        }
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::ObjectNotFound { .. } | KubeError::DefinitionNotFound { .. } => true,
            KubeError::Apply { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            KubeError::ConflictUnresolved { .. } => true,
            KubeError::Apply { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Whether requeueing the subject may succeed without operator action
    ///
    /// Template errors need the definition author to step in, everything
    /// touching the cluster may heal by itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            KubeError::Render(_)
            | KubeError::Schema(_)
            | KubeError::Policy(_)
            | KubeError::Core(_)
            | KubeError::InvalidManifest(_)
            | KubeError::InvalidConfig(_)
            | KubeError::Serialization(_) => false,
            KubeError::Apply { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    /// Machine-readable reason written to the subject's status
    pub fn reason(&self) -> ConditionReason {
        match self {
            KubeError::DefinitionNotFound { .. } => ConditionReason::DefinitionNotFound,
            KubeError::Render(err) => match err.kind() {
                RenderErrorKind::Compile => ConditionReason::TemplateCompileFailed,
                RenderErrorKind::Evaluation => ConditionReason::TemplateEvaluationFailed,
                RenderErrorKind::NotConcrete => ConditionReason::TemplateNotConcrete,
            },
            KubeError::Schema(_) | KubeError::Core(_) => ConditionReason::TemplateCompileFailed,
            KubeError::Policy(_) => ConditionReason::TemplateEvaluationFailed,
            KubeError::ConflictUnresolved { .. } => ConditionReason::ApplyConflict,
            KubeError::Timeout(_) => ConditionReason::Timeout,
            KubeError::Apply { source, .. } => match source.reason() {
                ConditionReason::ApplyConflict => ConditionReason::ApplyConflict,
                ConditionReason::Timeout => ConditionReason::Timeout,
                _ => ConditionReason::ApplyFailed,
            },
            _ => ConditionReason::ApplyFailed,
        }
    }

    /// Wrap an error with the operation and object it happened on
    pub(crate) fn apply(operation: &'static str, resource: impl ToString, source: KubeError) -> Self {
        match source {
            // Already carries its own identity
            KubeError::ConflictUnresolved { .. } | KubeError::Timeout(_) => source,
            other => KubeError::Apply {
                operation,
                resource: resource.to_string(),
                source: Box::new(other),
            },
        }
    }
}
