//! KDP Kube - Kubernetes integration of the KDP definition pipeline
//!
//! This crate provides:
//! - **CRDs**: BigDataCluster, Application, ContextSetting, ContextSecret, XDefinition
//! - **Definition Registry**: `(kind, type)` resolution with caching
//! - **Dynamic Enums**: schema enums listed from cluster objects
//! - **Reconciler**: get-or-create plus three-way merge patches with conflict retry
//! - **Status**: `Ready` conditions with machine-readable reasons
//! - **Pipeline**: the render and form-schema paths wired together
//! - **Mocks**: in-memory collaborators for tests

pub mod annotations;
pub mod augment;
pub mod cluster;
pub mod config;
pub mod crds;
pub mod error;
pub mod merge;
pub mod mock;
pub mod pipeline;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod settings;
pub mod status;

pub use augment::{EnumSource, KubeEnumSource, SourceItem, augment};
pub use cluster::{ClusterApi, KubeCluster};
pub use config::PlatformConfig;
pub use error::{KubeError, Result};
pub use merge::three_way_merge;
pub use mock::{
    ClusterOperationCounts, MemoryDefinitionStore, MemoryStatusWriter, MockCluster, StaticEnumSource,
    StaticSettingsSource, StoreOperationCounts,
};
pub use pipeline::{Collaborators, Pipeline, ReconcileOutcome};
pub use reconciler::{AppliedResource, ApplyAction, DispatchOptions, DispatchSummary, Reconciler};
pub use registry::{DefinitionRegistry, DefinitionStore, KubeDefinitionStore};
pub use retry::{Deadline, RetryPolicy, deadline_in};
pub use settings::{KubeSettingsSource, SettingsSource};
pub use status::{Condition, ConditionReason, KubeStatusWriter, StatusWriter};
