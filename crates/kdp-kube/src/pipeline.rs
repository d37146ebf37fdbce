//! Render pipeline
//!
//! Two entry points share the registry and definitions:
//!
//! - [`Pipeline::reconcile`]: resolve the definition, build the context,
//!   render, apply and report a condition on the subject
//! - [`Pipeline::form_schema`]: resolve, derive the input schema and fill
//!   dynamic enums, for forms
//!
//! The pipeline owns every collaborator; nothing is global.

use kdp_core::{ContextBuilder, GroupInfo, Subject};
use kdp_engine::{DerivedSchema, Engine, PolicyEvaluator, SchemaDeriver, StatusReport};
use kube::Client;
use std::sync::Arc;

use crate::augment::{EnumSource, KubeEnumSource, augment};
use crate::cluster::{ClusterApi, KubeCluster, identity_of};
use crate::config::PlatformConfig;
use crate::crds::GROUP_LABEL;
use crate::error::Result;
use crate::reconciler::{DispatchOptions, DispatchSummary, Reconciler};
use crate::registry::{DefinitionRegistry, DefinitionStore, KubeDefinitionStore};
use crate::retry::{Deadline, within};
use crate::settings::{KubeSettingsSource, SettingsSource};
use crate::status::{Condition, KubeStatusWriter, StatusWriter};

/// External collaborators of a pipeline
pub struct Collaborators {
    pub store: Arc<dyn DefinitionStore>,
    pub settings: Arc<dyn SettingsSource>,
    pub enums: Arc<dyn EnumSource>,
    pub cluster: Arc<dyn ClusterApi>,
    pub status: Arc<dyn StatusWriter>,
}

/// Outcome of one reconcile
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Condition written to the subject; `Unhealthy` when applied manifests
    /// fail the health policy
    pub condition: Condition,
    /// Health of the primary object, when the definition has status rules
    pub health: Option<StatusReport>,
    pub result: Result<DispatchSummary>,
}

impl ReconcileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<DispatchSummary> {
        self.result
    }
}

pub struct Pipeline {
    config: PlatformConfig,
    registry: DefinitionRegistry,
    settings: Arc<dyn SettingsSource>,
    enums: Arc<dyn EnumSource>,
    cluster: Arc<dyn ClusterApi>,
    status: Arc<dyn StatusWriter>,
    reconciler: Reconciler,
    engine: Engine,
    deriver: SchemaDeriver,
    policy: PolicyEvaluator,
}

impl Pipeline {
    pub fn new(config: PlatformConfig, parts: Collaborators) -> Self {
        Self {
            registry: DefinitionRegistry::new(parts.store),
            reconciler: Reconciler::new(Arc::clone(&parts.cluster), config.retry.clone()),
            settings: parts.settings,
            enums: parts.enums,
            cluster: parts.cluster,
            status: parts.status,
            engine: Engine::new(),
            deriver: SchemaDeriver::new(),
            policy: PolicyEvaluator::new(),
            config,
        }
    }

    /// Pipeline talking to a live cluster
    pub async fn connect(client: Client, config: PlatformConfig) -> Result<Self> {
        let cluster = KubeCluster::new(client.clone(), &config.field_manager).await?;
        let parts = Collaborators {
            store: Arc::new(KubeDefinitionStore::new(
                client.clone(),
                &config.system_namespace,
                &config.mapping_config_map,
            )),
            settings: Arc::new(KubeSettingsSource::new(client.clone())),
            enums: Arc::new(KubeEnumSource::new(client.clone())),
            cluster: Arc::new(cluster),
            status: Arc::new(KubeStatusWriter::new(client, &config.field_manager)),
        };
        Ok(Self::new(config, parts))
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Render a subject, apply the manifests and report the result
    ///
    /// The condition is written to the subject whether or not the
    /// reconcile succeeded. A failed status write is logged only.
    ///
    /// Applied manifests whose primary object fails the definition's health
    /// policy leave `result` successful but report `Ready=False` with reason
    /// `Unhealthy`.
    pub async fn reconcile<S>(&self, subject: &S, group: &GroupInfo, deadline: Deadline) -> ReconcileOutcome
    where
        S: Subject + Sync,
    {
        let identity = subject.identity();
        let (result, health) = match self.apply(subject, group, deadline).await {
            Ok((summary, health)) => (Ok(summary), health),
            Err(err) => (Err(err), None),
        };

        let condition = match &result {
            Ok(summary) => {
                let message = health
                    .as_ref()
                    .and_then(|h| h.message.clone())
                    .unwrap_or_else(|| summary.summary());
                match &health {
                    Some(report) if !report.healthy => {
                        tracing::info!(subject = %identity, %message, "health policy not satisfied");
                        Condition::unhealthy(message)
                    }
                    _ => Condition::ready(message),
                }
            }
            Err(err) => {
                tracing::warn!(subject = %identity, reason = %err.reason(), error = %err, "reconcile failed");
                Condition::failed(err)
            }
        };

        if let Err(err) = self.status.write(&identity, &condition, deadline).await {
            tracing::warn!(subject = %identity, error = %err, "failed to write status");
        }

        ReconcileOutcome {
            condition,
            health,
            result,
        }
    }

    async fn apply<S>(
        &self,
        subject: &S,
        group: &GroupInfo,
        deadline: Deadline,
    ) -> Result<(DispatchSummary, Option<StatusReport>)>
    where
        S: Subject + Sync,
    {
        let identity = subject.identity();
        let definition = self
            .registry
            .resolve(&identity.kind, &subject.type_hint(), deadline)
            .await?;
        tracing::debug!(subject = %identity, definition = %definition.name, "rendering");

        let settings_namespace = identity
            .namespace
            .clone()
            .or_else(|| group.default_namespace.clone())
            .unwrap_or_else(|| group.name.clone());
        let settings = within(
            deadline,
            "shared settings listing",
            self.settings.list(&settings_namespace, &self.config.settings_label),
        )
        .await?;

        let mut builder = ContextBuilder::new(subject, group).with_shared_settings(settings);
        if self.config.short_id_length > 0 {
            builder = builder.with_short_id(self.config.short_id_length);
        }
        let context = builder.build()?;

        let manifests = self
            .engine
            .render_definition(&definition, &context, &subject.template_parameters())?;

        let mut options = DispatchOptions::default()
            .with_label(GROUP_LABEL, &group.name)
            .with_deadline(deadline);
        if identity.uid.is_some() {
            options.owner = Some(identity.clone());
        }
        let summary = self.reconciler.dispatch(&manifests, &options).await?;

        let has_rules = definition.health_policy.is_some() || definition.custom_status.is_some();
        let health = match manifests.iter().next() {
            Some(primary) if has_rules => {
                let id = identity_of(&primary.object)?;
                let live = within(deadline, "status read", self.cluster.get(&id))
                    .await?
                    .unwrap_or_else(|| primary.object.clone());
                Some(self.policy.evaluate(&definition, &live, &context)?)
            }
            _ => None,
        };

        Ok((summary, health))
    }

    /// Input schema of a definition with dynamic enums filled in
    ///
    /// `scope` is the label selector limiting the listed source objects.
    pub async fn form_schema(
        &self,
        kind: &str,
        type_hint: &str,
        scope: &str,
        deadline: Deadline,
    ) -> Result<DerivedSchema> {
        let definition = self.registry.resolve(kind, type_hint, deadline).await?;
        let derived = self.deriver.derive(&definition.template)?;
        let schema = augment(
            &derived.schema,
            &definition.dynamic_parameters,
            scope,
            self.enums.as_ref(),
            deadline,
        )
        .await?;

        Ok(DerivedSchema {
            schema,
            ui_schema: derived.ui_schema,
        })
    }
}
