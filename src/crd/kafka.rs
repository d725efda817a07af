//! Strimzi Kafka and KafkaNodePool (kafka.strimzi.io/v1beta2)
//!
//! Only the fields this operator writes, plus the status fields it reads.

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NODE_POOLS_ANNOTATION: &str = "strimzi.io/node-pools";
pub const KRAFT_ANNOTATION: &str = "strimzi.io/kraft";
pub const CLUSTER_LABEL: &str = "strimzi.io/cluster";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "Kafka",
    plural = "kafkas",
    namespaced,
    status = "KafkaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSpec {
    pub kafka: KafkaClusterSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_operator: Option<EntityOperatorSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaClusterSpec {
    pub version: String,

    pub metadata_version: String,

    /// Always zero: node pools carry the real replica count.
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub listeners: Vec<KafkaListener>,

    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaListener {
    pub name: String,
    pub port: i32,
    #[serde(rename = "type")]
    pub listener_type: String,
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityOperatorSpec {
    #[serde(default)]
    pub topic_operator: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub user_operator: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaStatus {
    #[serde(default)]
    pub conditions: Vec<StrimziCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka_metadata_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrimziCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Kafka {
    /// The cluster id Strimzi reported, if non-empty.
    pub fn cluster_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.cluster_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// The first `Ready` condition, matched ignoring case.
    pub fn ready_condition(&self) -> Option<&StrimziCondition> {
        self.status.as_ref().and_then(|s| {
            s.conditions
                .iter()
                .find(|c| c.condition_type.eq_ignore_ascii_case("ready"))
        })
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "KafkaNodePool",
    plural = "kafkanodepools",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaNodePoolSpec {
    pub replicas: i32,

    pub roles: Vec<String>,

    pub storage: NodePoolStorage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStorage {
    #[serde(rename = "type")]
    pub storage_type: String,

    #[serde(default)]
    pub volumes: Vec<JbodVolume>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JbodVolume {
    pub id: u32,

    #[serde(rename = "type")]
    pub volume_type: String,

    pub size: String,

    pub delete_claim: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kraft_metadata: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_condition_ignores_case() {
        let kafka: Kafka = serde_json::from_value(serde_json::json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "Kafka",
            "metadata": { "name": "wandb-kafka", "namespace": "wandb" },
            "spec": { "kafka": { "version": "4.1.0", "metadataVersion": "4.1-IV0" } },
            "status": {
                "conditions": [
                    { "type": "Warning", "status": "True" },
                    { "type": "READY", "status": "True", "reason": "first" },
                    { "type": "Ready", "status": "False", "reason": "second" }
                ],
                "kafkaMetadataState": "KRaft",
                "clusterId": "abc"
            }
        }))
        .unwrap();

        let ready = kafka.ready_condition().unwrap();
        assert_eq!(ready.reason.as_deref(), Some("first"));
        assert_eq!(kafka.cluster_id(), Some("abc"));
    }

    #[test]
    fn test_empty_cluster_id_is_none() {
        let mut kafka = Kafka::new("k", KafkaSpec::default());
        assert_eq!(kafka.cluster_id(), None);
        kafka.status = Some(KafkaStatus {
            cluster_id: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(kafka.cluster_id(), None);
    }
}
