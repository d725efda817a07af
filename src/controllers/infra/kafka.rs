//! Strimzi Kafka in KRaft mode
//!
//! A `Kafka` resource with node pools enabled plus one `KafkaNodePool`
//! carrying the broker/controller replicas and their JBOD storage.

use super::{ComponentReconciler, Observation, Signal};
use crate::conditions::{ConditionStatus, REASON_NOT_READY, REASON_UNKNOWN};
use crate::connection::kafka::{kafka_connection, resolve_cluster_id, restore_cluster_id, PLAIN_PORT, TLS_PORT};
use crate::connection::{
    apply_retention, common_labels, owner_reference, publish_connection, read_connection, KEY_CLUSTER_ID,
    KEY_HOST, KEY_PORT,
};
use crate::crd::kafka::{
    EntityOperatorSpec, JbodVolume, Kafka, KafkaClusterSpec, KafkaListener, KafkaNodePool,
    KafkaNodePoolSpec, KafkaSpec, NodePoolStorage, CLUSTER_LABEL, KRAFT_ANNOTATION,
    NODE_POOLS_ANNOTATION,
};
use crate::crd::WeightsAndBiases;
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, CrudAction, ResourceGateway};
use crate::presets::{KafkaConfig, KAFKA_METADATA_VERSION, KAFKA_VERSION};
use crate::state::{ComponentRules, ConditionKind, InfraState};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info_span, warn, Span};

pub const KAFKA_CUSTOM_RESOURCE: &str = "KafkaCustomResource";
pub const KAFKA_NODE_POOL_CUSTOM_RESOURCE: &str = "KafkaNodePoolCustomResource";
pub const KAFKA_CONNECTION_INFO: &str = "KafkaConnectionInfo";
pub const KAFKA_REPORTED_READY: &str = "KafkaReportedReady";

pub static RULES: ComponentRules = ComponentRules {
    component: "kafka",
    connection_type: KAFKA_CONNECTION_INFO,
    kinds: &[
        (KAFKA_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (KAFKA_NODE_POOL_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (KAFKA_CONNECTION_INFO, ConditionKind::ConnectionInfo),
        (
            KAFKA_REPORTED_READY,
            ConditionKind::Reported {
                on_false: &[],
                otherwise: InfraState::Unavailable,
            },
        ),
    ],
};

/// Build the Kafka cluster resource; `.spec.kafka.replicas` stays 0 as the node pool owns replicas.
pub fn build_kafka(config: &KafkaConfig, parent: &WeightsAndBiases) -> Kafka {
    let names = &config.common.names;
    let replication = &config.replication;

    let mut annotations = BTreeMap::new();
    annotations.insert(NODE_POOLS_ANNOTATION.to_string(), "enabled".to_string());
    annotations.insert(KRAFT_ANNOTATION.to_string(), "enabled".to_string());

    let mut broker_config = BTreeMap::new();
    broker_config.insert(
        "offsets.topic.replication.factor".to_string(),
        json!(replication.offsets_topic_rf),
    );
    broker_config.insert(
        "transaction.state.log.replication.factor".to_string(),
        json!(replication.transaction_state_rf),
    );
    broker_config.insert(
        "transaction.state.log.min.isr".to_string(),
        json!(replication.transaction_state_isr),
    );
    broker_config.insert(
        "default.replication.factor".to_string(),
        json!(replication.default_replication_factor),
    );
    broker_config.insert(
        "min.insync.replicas".to_string(),
        json!(replication.min_in_sync_replicas),
    );

    Kafka {
        metadata: ObjectMeta {
            name: Some(names.vendor_name().to_string()),
            namespace: Some(names.namespace().to_string()),
            labels: Some(common_labels("kafka", names.vendor_name())),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_reference(parent, true)]),
            ..Default::default()
        },
        spec: KafkaSpec {
            kafka: KafkaClusterSpec {
                version: KAFKA_VERSION.to_string(),
                metadata_version: KAFKA_METADATA_VERSION.to_string(),
                replicas: 0,
                listeners: vec![
                    KafkaListener {
                        name: "plain".to_string(),
                        port: PLAIN_PORT as i32,
                        listener_type: "internal".to_string(),
                        tls: false,
                    },
                    KafkaListener {
                        name: "tls".to_string(),
                        port: TLS_PORT as i32,
                        listener_type: "internal".to_string(),
                        tls: true,
                    },
                ],
                config: broker_config,
            },
            entity_operator: Some(EntityOperatorSpec::default()),
        },
        status: None,
    }
}

/// Build the node pool holding every broker/controller replica.
pub fn build_node_pool(config: &KafkaConfig, parent: &WeightsAndBiases) -> KafkaNodePool {
    let names = &config.common.names;
    let mut labels = common_labels("kafka", names.vendor_name());
    labels.insert(CLUSTER_LABEL.to_string(), names.vendor_name().to_string());

    KafkaNodePool {
        metadata: ObjectMeta {
            name: Some(names.node_pool_name()),
            namespace: Some(names.namespace().to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(parent, true)]),
            ..Default::default()
        },
        spec: KafkaNodePoolSpec {
            replicas: config.common.replicas,
            roles: vec!["broker".to_string(), "controller".to_string()],
            storage: NodePoolStorage {
                storage_type: "jbod".to_string(),
                volumes: vec![JbodVolume {
                    id: 0,
                    volume_type: "persistent-claim".to_string(),
                    size: config.common.storage_size.0.clone(),
                    delete_claim: false,
                    kraft_metadata: Some("shared".to_string()),
                }],
            },
            resources: config.common.resources.clone(),
        },
    }
}

/// Project Strimzi's `Ready` condition.
pub fn reported_ready(kafka: &Kafka) -> Signal {
    let metadata_state = kafka
        .status
        .as_ref()
        .and_then(|s| s.kafka_metadata_state.clone())
        .filter(|s| !s.is_empty());

    let Some(ready) = kafka.ready_condition() else {
        return Signal::reported(
            KAFKA_REPORTED_READY,
            ConditionStatus::Unknown,
            REASON_UNKNOWN,
            metadata_state.unwrap_or_default(),
        );
    };

    let status = ConditionStatus::parse(&ready.status);
    let is_ready = status == ConditionStatus::True;
    let reason = ready.reason.clone().filter(|r| !r.is_empty());

    let message = reason
        .clone()
        .filter(|_| is_ready)
        .or(metadata_state)
        .unwrap_or_else(|| if is_ready { "Ready" } else { "Not Ready" }.to_string());
    let reason = reason.unwrap_or_else(|| if is_ready { "Ready" } else { REASON_NOT_READY }.to_string());

    Signal::reported(KAFKA_REPORTED_READY, status, reason, message)
}

pub struct KafkaReconciler<'a, G> {
    gateway: &'a G,
    parent: &'a WeightsAndBiases,
    config: KafkaConfig,
    span: Span,
}

impl<'a, G: ResourceGateway> KafkaReconciler<'a, G> {
    pub fn new(gateway: &'a G, parent: &'a WeightsAndBiases, config: KafkaConfig) -> Self {
        let span = info_span!(
            "infra",
            component = "kafka",
            name = %config.common.names.vendor_key()
        );
        Self {
            gateway,
            parent,
            config,
            span,
        }
    }

    async fn publish(&self, actual: &Kafka, restored: Option<String>) -> Result<Observation> {
        let names = &self.config.common.names;
        let mut observation = Observation::default();

        let secret_id = read_connection(self.gateway, names)
            .await?
            .and_then(|info| info.get(KEY_CLUSTER_ID).map(str::to_string))
            .unwrap_or_default();
        let cr_id = restored
            .as_deref()
            .or(actual.cluster_id())
            .unwrap_or_default();
        let info = kafka_connection(names, &resolve_cluster_id(&secret_id, cr_id));

        let secret = if info.is_complete(&[KEY_HOST, KEY_PORT]) {
            let connection =
                publish_connection(self.gateway, names, "kafka", self.parent, &info).await?;
            let name = connection.url.name.clone();
            observation.connection = Some(connection);
            Some(name)
        } else {
            None
        };
        observation.push(Signal::ConnectionInfo {
            condition_type: KAFKA_CONNECTION_INFO,
            secret,
        });
        Ok(observation)
    }
}

#[async_trait]
impl<'a, G: ResourceGateway> ComponentReconciler for KafkaReconciler<'a, G> {
    fn rules(&self) -> &'static ComponentRules {
        &RULES
    }

    fn enabled(&self) -> bool {
        self.config.common.enabled
    }

    fn span(&self) -> &Span {
        &self.span
    }

    async fn observe(&self) -> Result<Observation> {
        let names = &self.config.common.names;
        let pool_key = names.key(names.node_pool_name());

        let actual: Option<Kafka> = get_resource(self.gateway, &names.vendor_key(), "Kafka").await?;
        let actual_pool: Option<KafkaNodePool> =
            get_resource(self.gateway, &pool_key, "KafkaNodePool").await?;

        let enabled = self.config.common.enabled;
        let desired = enabled.then(|| build_kafka(&self.config, self.parent));
        let desired_pool = enabled.then(|| build_node_pool(&self.config, self.parent));

        let action = crud_resource(self.gateway, desired.as_ref(), actual.as_ref()).await?;
        let pool_action =
            crud_resource(self.gateway, desired_pool.as_ref(), actual_pool.as_ref()).await?;

        let mut observation = Observation::default();
        match (action, actual.as_ref()) {
            (CrudAction::Update, Some(actual)) => {
                let restored =
                    restore_cluster_id(self.gateway, names, actual, owner_reference(self.parent, false))
                        .await?;
                observation = self.publish(actual, restored).await?;

                let reported = reported_ready(actual);
                if let Signal::Reported {
                    status: ConditionStatus::True,
                    ..
                } = &reported
                {
                    if observation.connection.is_none() {
                        warn!(
                            component = "kafka",
                            code = "ConnectionInfoUnavailable",
                            "Kafka reports ready but its connection info is unavailable"
                        );
                    }
                }
                observation.push(reported);
            }
            (CrudAction::Delete, _) => {
                apply_retention(self.gateway, names, "kafka", self.config.common.retention).await?;
            }
            _ => {}
        }
        observation.push(Signal::lifecycle(KAFKA_CUSTOM_RESOURCE, action));
        observation.push(Signal::lifecycle(KAFKA_NODE_POOL_CUSTOM_RESOURCE, pool_action));
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::find_condition;
    use crate::connection::ConnectionInfo;
    use crate::controllers::infra::run_component;
    use crate::crd::{InfraStatus, KafkaInfraSpec, RetentionPolicy, Size};
    use crate::gateway::memory::MemoryGateway;
    use crate::presets::resolve_kafka;
    use crate::testing::{test_parent, small_parent};
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
    use std::time::Duration;

    const EXPIRY: Duration = Duration::from_secs(7200);

    fn dev_config() -> KafkaConfig {
        resolve_kafka(Size::Dev, &KafkaInfraSpec::default(), "wandb").unwrap()
    }

    fn disabled_config(policy: RetentionPolicy) -> KafkaConfig {
        let mut spec = KafkaInfraSpec::default();
        spec.common.enabled = false;
        spec.common.retention_policy = policy;
        resolve_kafka(Size::Dev, &spec, "wandb").unwrap()
    }

    fn ready_status() -> serde_json::Value {
        json!({
            "conditions": [{ "type": "Ready", "status": "True" }],
            "kafkaMetadataState": "KRaft"
        })
    }

    #[test]
    fn test_kraft_shape() {
        let parent = small_parent();
        let config = resolve_kafka(Size::Small, &KafkaInfraSpec::default(), "wandb").unwrap();
        let kafka = build_kafka(&config, &parent);
        assert_eq!(kafka.spec.kafka.replicas, 0);
        let annotations = kafka.metadata.annotations.clone().unwrap();
        assert_eq!(annotations[NODE_POOLS_ANNOTATION], "enabled");
        assert_eq!(annotations[KRAFT_ANNOTATION], "enabled");
        assert_eq!(kafka.spec.kafka.config["min.insync.replicas"], json!(2));
        assert_eq!(kafka.spec.kafka.listeners[1].port, 9093);
        let owner = &kafka.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.controller, Some(true));

        let pool = build_node_pool(&config, &parent);
        assert_eq!(pool.metadata.name.as_deref(), Some("wandb-kafka-node-pool"));
        assert_eq!(pool.spec.replicas, 3);
        assert_eq!(pool.spec.roles, vec!["broker", "controller"]);
        assert!(!pool.spec.storage.volumes[0].delete_claim);
        assert_eq!(pool.metadata.labels.unwrap()[CLUSTER_LABEL], "wandb-kafka");
    }

    #[test]
    fn test_reported_message_falls_back() {
        let config = dev_config();
        let mut kafka = build_kafka(&config, &test_parent());
        kafka.status = serde_json::from_value(json!({
            "conditions": [{ "type": "ready", "status": "False" }],
            "kafkaMetadataState": "KRaftMigration"
        }))
        .unwrap();
        let Signal::Reported { status, reason, message, .. } = reported_ready(&kafka) else {
            panic!("expected a reported signal");
        };
        assert_eq!(status, ConditionStatus::False);
        assert_eq!(reason, REASON_NOT_READY);
        assert_eq!(message, "KRaftMigration");

        kafka.status = serde_json::from_value(json!({
            "conditions": [{ "type": "Ready", "status": "True" }]
        }))
        .unwrap();
        let Signal::Reported { message, .. } = reported_ready(&kafka) else {
            panic!("expected a reported signal");
        };
        assert_eq!(message, "Ready");
    }

    #[tokio::test]
    async fn test_first_tick_creates_both_resources() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        let reconciler = KafkaReconciler::new(&gw, &parent, dev_config());
        let outcome = run_component(&reconciler, &InfraStatus::default(), 1, EXPIRY).await;

        assert!(gw.fetch::<Kafka>("wandb", "wandb-kafka").is_some());
        assert!(gw.fetch::<KafkaNodePool>("wandb", "wandb-kafka-node-pool").is_some());
        assert!(gw.fetch::<Secret>("wandb", "wandb-kafka-connection").is_none());
        assert_eq!(outcome.status.state, InfraState::Pending);
        let cr = find_condition(&outcome.status.conditions, KAFKA_CUSTOM_RESOURCE).unwrap();
        assert_eq!(cr.reason, "PendingCreate");
    }

    #[tokio::test]
    async fn test_ready_kafka_publishes_connection() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        let reconciler = KafkaReconciler::new(&gw, &parent, dev_config());
        let first = run_component(&reconciler, &InfraStatus::default(), 1, EXPIRY).await;
        gw.set_status::<Kafka>("wandb", "wandb-kafka", ready_status());

        let outcome = run_component(&reconciler, &first.status, 1, EXPIRY).await;
        assert_eq!(outcome.status.state, InfraState::Healthy);
        assert!(outcome.status.ready);
        assert_eq!(outcome.requeue_after(), Duration::from_secs(600));
        let reported = find_condition(&outcome.status.conditions, KAFKA_REPORTED_READY).unwrap();
        assert_eq!(reported.status, ConditionStatus::True);
        assert_eq!(reported.message, "KRaft");

        let secret: Secret = gw.fetch("wandb", "wandb-kafka-connection").unwrap();
        assert_eq!(
            ConnectionInfo::from_secret(&secret).url(),
            "kafka://wandb-kafka.wandb.svc.cluster.local:9092"
        );
        assert_eq!(outcome.status.connection.unwrap().url.name, "wandb-kafka-connection");
    }

    #[tokio::test]
    async fn test_disable_retains_then_restore_adopts_cluster_id() {
        let gw = MemoryGateway::new();
        let parent = test_parent();

        let enabled = KafkaReconciler::new(&gw, &parent, dev_config());
        let status = run_component(&enabled, &InfraStatus::default(), 1, EXPIRY).await.status;
        gw.set_status::<Kafka>(
            "wandb",
            "wandb-kafka",
            json!({ "conditions": [{ "type": "Ready", "status": "True" }], "clusterId": "retained-id" }),
        );
        let status = run_component(&enabled, &status, 1, EXPIRY).await.status;
        gw.insert(&PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data-0-wandb-kafka-wandb-kafka-node-pool-0".to_string()),
                namespace: Some("wandb".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let disabled = KafkaReconciler::new(&gw, &parent, disabled_config(RetentionPolicy::Retain));
        let status = run_component(&disabled, &status, 2, EXPIRY).await.status;
        assert!(gw.fetch::<Kafka>("wandb", "wandb-kafka").is_none());
        let backup: Secret = gw.fetch("wandb", "wandb-kafka-connection-backup").unwrap();
        assert_eq!(
            ConnectionInfo::from_secret(&backup).get(KEY_CLUSTER_ID),
            Some("retained-id")
        );
        gw.remove::<Secret>("wandb", "wandb-kafka-connection");

        let status = run_component(&enabled, &status, 3, EXPIRY).await.status;
        let created: Kafka = gw.fetch("wandb", "wandb-kafka").unwrap();
        assert_eq!(created.cluster_id(), None);

        run_component(&enabled, &status, 3, EXPIRY).await;
        let adopted: Kafka = gw.fetch("wandb", "wandb-kafka").unwrap();
        assert_eq!(adopted.cluster_id(), Some("retained-id"));
        let secret: Secret = gw.fetch("wandb", "wandb-kafka-connection").unwrap();
        assert_eq!(
            ConnectionInfo::from_secret(&secret).get(KEY_CLUSTER_ID),
            Some("retained-id")
        );
    }

    #[tokio::test]
    async fn test_purge_deletes_connection_on_disable() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        let enabled = KafkaReconciler::new(&gw, &parent, dev_config());
        let status = run_component(&enabled, &InfraStatus::default(), 1, EXPIRY).await.status;
        gw.set_status::<Kafka>("wandb", "wandb-kafka", ready_status());
        let status = run_component(&enabled, &status, 1, EXPIRY).await.status;
        assert!(gw.fetch::<Secret>("wandb", "wandb-kafka-connection").is_some());

        let disabled = KafkaReconciler::new(&gw, &parent, disabled_config(RetentionPolicy::Purge));
        let outcome = run_component(&disabled, &status, 2, EXPIRY).await;
        assert!(gw.fetch::<Secret>("wandb", "wandb-kafka-connection").is_none());
        assert!(gw.fetch::<Secret>("wandb", "wandb-kafka-connection-backup").is_none());
        let cr = find_condition(&outcome.status.conditions, KAFKA_CUSTOM_RESOURCE).unwrap();
        assert_eq!(cr.reason, "PendingDelete");
        assert_eq!(outcome.status.state, InfraState::Unavailable);
    }

    #[tokio::test]
    async fn test_api_failure_marks_error() {
        let gw = MemoryGateway::new();
        gw.fail_kind::<KafkaNodePool>();
        let parent = test_parent();
        let reconciler = KafkaReconciler::new(&gw, &parent, dev_config());
        let outcome = run_component(&reconciler, &InfraStatus::default(), 1, EXPIRY).await;
        assert_eq!(outcome.status.state, InfraState::Error);
        assert_eq!(outcome.error.unwrap().code(), "ApiError");
    }
}
