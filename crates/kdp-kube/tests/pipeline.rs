//! Integration tests for the render pipeline
//!
//! Every collaborator is an in-memory mock; no cluster is needed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kdp_core::{Definition, DynamicParameter, GroupInfo, Subject};
use kdp_kube::cluster::identity_of;
use kdp_kube::crds::{Application, ApplicationSpec, GROUP_LABEL};
use kdp_kube::{
    Collaborators, ConditionReason, KubeError, MemoryDefinitionStore, MemoryStatusWriter, MockCluster, Pipeline,
    PlatformConfig, SourceItem, StaticEnumSource, StaticSettingsSource, deadline_in,
};
use serde_json::{Value as JsonValue, json};

const CONFIGMAP: &str = r#"parameter:
  host: string

output:
  apiVersion: v1
  kind: ConfigMap
  metadata:
    name: {{ context.name }}
    namespace: {{ context.namespace }}
  data:
    host: {{ parameter.host }}
    zookeeper: {{ context.zkHost }}
"#;

const KAFKA: &str = r#"parameter:
  // +ui:order=1
  replicas: *1 | int
  dependencies:
    // Zookeeper setting the brokers connect to
    zookeeper: string

output:
  apiVersion: v1
  kind: ConfigMap
  metadata:
    name: {{ context.name }}
    namespace: {{ context.namespace }}
  data:
    zookeeper: {{ parameter.dependencies.zookeeper }}
"#;

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    pipeline: Pipeline,
    store: MemoryDefinitionStore,
    cluster: MockCluster,
    status: MemoryStatusWriter,
    settings: StaticSettingsSource,
}

fn harness(definitions: Vec<Definition>) -> Harness {
    harness_with_enums(definitions, StaticEnumSource::new())
}

fn harness_with_enums(definitions: Vec<Definition>, enums: StaticEnumSource) -> Harness {
    let store = MemoryDefinitionStore::with_definitions(definitions);
    let cluster = MockCluster::new();
    let status = MemoryStatusWriter::new();
    let settings = StaticSettingsSource::new(vec![BTreeMap::from([(
        "zkHost".to_string(),
        "zookeeper.kdp-test:2181".to_string(),
    )])]);

    let pipeline = Pipeline::new(
        PlatformConfig::default(),
        Collaborators {
            store: Arc::new(store.clone()),
            settings: Arc::new(settings.clone()),
            enums: Arc::new(enums),
            cluster: Arc::new(cluster.clone()),
            status: Arc::new(status.clone()),
        },
    );

    Harness {
        pipeline,
        store,
        cluster,
        status,
        settings,
    }
}

fn config_definition() -> Definition {
    Definition::new("app-config", CONFIGMAP).for_resource("Application", "config")
}

fn application(type_hint: &str, properties: JsonValue) -> Application {
    let mut app = Application::new(
        "app-config",
        ApplicationSpec {
            type_hint: type_hint.to_string(),
            properties,
        },
    );
    app.metadata.uid = Some("5f0c-11ee".to_string());
    app.metadata.labels = Some([(GROUP_LABEL.to_string(), "admin".to_string())].into());
    app
}

fn group() -> GroupInfo {
    let mut group = GroupInfo::new("admin");
    group.default_namespace = Some("kdp-test".to_string());
    group
}

fn rendered_config_map() -> JsonValue {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "app-config", "namespace": "kdp-test"}
    })
}

// ============================================================================
// Reconcile
// ============================================================================

mod reconcile {
    use super::*;

    #[tokio::test]
    async fn test_configmap_end_to_end() {
        let h = harness(vec![config_definition()]);
        let app = application("config", json!({"host": "zk:2181"}));

        let outcome = h.pipeline.reconcile(&app, &group(), None).await;
        assert!(outcome.is_success(), "{:?}", outcome.result);
        assert!(outcome.condition.is_ready());
        assert_eq!(outcome.condition.reason, ConditionReason::Applied);
        assert!(outcome.health.is_none());

        let stored = h.cluster.object(&identity_of(&rendered_config_map()).unwrap()).unwrap();
        assert_eq!(stored["data"]["host"], "zk:2181");
        assert_eq!(stored["data"]["zookeeper"], "zookeeper.kdp-test:2181");
        assert_eq!(stored["metadata"]["labels"][GROUP_LABEL], "admin");

        let owner = &stored["metadata"]["ownerReferences"][0];
        assert_eq!(owner["kind"], "Application");
        assert_eq!(owner["name"], "app-config");
        assert_eq!(owner["uid"], "5f0c-11ee");
        assert_eq!(owner["controller"], true);

        let written = h.status.last(&app.identity()).unwrap();
        assert!(written.is_ready());
        assert_eq!(h.settings.list_count(), 1);
    }

    #[tokio::test]
    async fn test_second_reconcile_patches() {
        let h = harness(vec![config_definition()]);

        let first = application("config", json!({"host": "zk:2181"}));
        let summary = h
            .pipeline
            .reconcile(&first, &group(), None)
            .await
            .into_result()
            .unwrap();
        assert_eq!(summary.created(), 1);

        let second = application("config", json!({"host": "zk:2182"}));
        let summary = h
            .pipeline
            .reconcile(&second, &group(), None)
            .await
            .into_result()
            .unwrap();
        assert_eq!(summary.patched(), 1);
        assert_eq!(summary.resources(), vec!["kdp-test/ConfigMap/app-config".to_string()]);

        let stored = h.cluster.object(&identity_of(&rendered_config_map()).unwrap()).unwrap();
        assert_eq!(stored["data"]["host"], "zk:2182");
        assert_eq!(h.cluster.object_count(), 1);

        // one definition lookup, served from the cache the second time
        assert_eq!(h.store.operation_counts().definition_gets, 1);
    }

    #[tokio::test]
    async fn test_health_rules_fill_the_message() {
        let mut definition = config_definition();
        definition.health_policy = Some("output.data.host == 'zk:2181'".to_string());
        definition.custom_status = Some("{{ context.name }} points at {{ output.data.host }}".to_string());
        let h = harness(vec![definition]);

        let app = application("config", json!({"host": "zk:2181"}));
        let outcome = h.pipeline.reconcile(&app, &group(), deadline_in(Duration::from_secs(30))).await;

        let health = outcome.health.clone().unwrap();
        assert!(health.healthy);
        assert!(outcome.condition.is_ready());
        assert_eq!(outcome.condition.message, "app-config points at zk:2181");
    }

    #[tokio::test]
    async fn test_failing_health_policy_is_not_ready() {
        let mut definition = config_definition();
        definition.health_policy = Some("output.data.host == 'zk:2181'".to_string());
        definition.custom_status = Some("waiting for {{ output.data.host }}".to_string());
        let h = harness(vec![definition]);

        let app = application("config", json!({"host": "zk:9999"}));
        let outcome = h.pipeline.reconcile(&app, &group(), None).await;

        // the manifests were applied, only the health check failed
        assert!(outcome.is_success());
        assert_eq!(h.cluster.object_count(), 1);
        assert!(!outcome.health.clone().unwrap().healthy);

        assert!(!outcome.condition.is_ready());
        assert_eq!(outcome.condition.reason, ConditionReason::Unhealthy);
        assert_eq!(outcome.condition.message, "waiting for zk:9999");

        let written = h.status.last(&app.identity()).unwrap();
        assert!(!written.is_ready());
        assert_eq!(written.reason, ConditionReason::Unhealthy);
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_unknown_type_reports_definition_not_found() {
        let h = harness(vec![config_definition()]);
        let app = application("flink", json!({}));

        let outcome = h.pipeline.reconcile(&app, &group(), None).await;
        assert!(!outcome.is_success());
        assert!(!outcome.condition.is_ready());
        assert_eq!(outcome.condition.reason, ConditionReason::DefinitionNotFound);

        let written = h.status.last(&app.identity()).unwrap();
        assert_eq!(written.reason, ConditionReason::DefinitionNotFound);
        assert_eq!(h.cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_parameter_reports_not_concrete() {
        let h = harness(vec![config_definition()]);
        let app = application("config", json!({}));

        let outcome = h.pipeline.reconcile(&app, &group(), None).await;
        assert_eq!(outcome.condition.reason, ConditionReason::TemplateNotConcrete);
        assert!(outcome.condition.message.contains("parameter.host"));

        // nothing reaches the cluster
        assert_eq!(h.cluster.operation_counts().gets, 0);
        assert_eq!(h.cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_broken_template_reports_compile_failure() {
        let broken = Definition::new("broken", "output:\n  name: {{ context.name \n")
            .for_resource("Application", "config");
        let h = harness(vec![broken]);

        let outcome = h.pipeline.reconcile(&application("config", json!({})), &group(), None).await;
        assert_eq!(outcome.condition.reason, ConditionReason::TemplateCompileFailed);
    }

    #[tokio::test]
    async fn test_unresolved_conflict_reports_apply_conflict() {
        let h = harness(vec![config_definition()]);
        let app = application("config", json!({"host": "zk:2181"}));
        h.pipeline.reconcile(&app, &group(), None).await.into_result().unwrap();

        h.cluster.inject_conflicts(100);
        let changed = application("config", json!({"host": "zk:2182"}));
        let outcome = h.pipeline.reconcile(&changed, &group(), None).await;
        assert_eq!(outcome.condition.reason, ConditionReason::ApplyConflict);
        assert!(outcome.result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let h = harness(vec![config_definition()]);
        h.store.fail_with("etcd unavailable");

        let outcome = h.pipeline.reconcile(&application("config", json!({})), &group(), None).await;
        assert!(!outcome.condition.is_ready());
        assert!(outcome.result.unwrap_err().is_retryable());
    }
}

// ============================================================================
// Form schema
// ============================================================================

mod form_schema {
    use super::*;

    fn kafka_definition() -> Definition {
        let mut definition = Definition::new("kafka", KAFKA).for_resource("Application", "kafka");
        definition.dynamic_parameters = vec![DynamicParameter {
            name: "dependencies.zookeeper".to_string(),
            source_kind: "ContextSetting".to_string(),
            source_sub_type: "zookeeper".to_string(),
            source_property_key: None,
            description: None,
        }];
        definition
    }

    fn enums() -> StaticEnumSource {
        StaticEnumSource::new().with(
            "ContextSetting",
            vec![
                SourceItem::new("zk-a", "zookeeper"),
                SourceItem::new("hdfs-a", "hdfs"),
                SourceItem::new("zk-b", "zookeeper"),
            ],
        )
    }

    #[tokio::test]
    async fn test_enums_are_listed_from_settings() {
        let h = harness_with_enums(vec![kafka_definition()], enums());

        let derived = h
            .pipeline
            .form_schema("Application", "kafka", "bdc.kdp.io/name=admin", None)
            .await
            .unwrap();

        let zookeeper = &derived.schema["properties"]["dependencies"]["properties"]["zookeeper"];
        assert_eq!(zookeeper["type"], "string");
        assert_eq!(zookeeper["enum"], json!(["zk-a", "zk-b"]));
        assert_eq!(zookeeper["description"], "Zookeeper setting the brokers connect to");
        assert_eq!(derived.schema["properties"]["replicas"]["default"], 1);
        assert_eq!(derived.ui_schema["ui:order"], json!(["replicas", "dependencies", "*"]));
    }

    #[tokio::test]
    async fn test_no_dynamic_parameters_leaves_schema_alone() {
        let h = harness_with_enums(vec![config_definition()], enums());

        let derived = h
            .pipeline
            .form_schema("Application", "config", "", None)
            .await
            .unwrap();
        assert_eq!(
            derived.schema,
            json!({
                "type": "object",
                "properties": {"host": {"type": "string"}},
                "required": ["host"]
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_definition() {
        let h = harness(vec![]);
        let err = h
            .pipeline
            .form_schema("Application", "kafka", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::DefinitionNotFound { .. }));
    }
}
