//! WeightsAndBiases Custom Resource Definition
//!
//! The parent resource: one size preset plus a block per infrastructure
//! component. The status aggregates one [`InfraStatus`] per component.

use crate::conditions::InfraCondition;
use crate::state::InfraState;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// WeightsAndBiases is the Schema for the weightsandbiases API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "apps.wandb.com",
    version = "v2",
    kind = "WeightsAndBiases",
    plural = "weightsandbiases",
    namespaced,
    status = "WandbStatus",
    shortname = "wandb",
    printcolumn = r#"{"name":"Size","type":"string","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WandbSpec {
    /// Size preset projecting to replica and resource defaults
    #[serde(default)]
    pub size: Size,

    #[serde(default)]
    pub mysql: MySqlInfraSpec,

    #[serde(default)]
    pub redis: RedisInfraSpec,

    #[serde(default)]
    pub kafka: KafkaInfraSpec,

    #[serde(default)]
    pub minio: MinioInfraSpec,

    #[serde(default)]
    pub clickhouse: ClickHouseInfraSpec,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    #[default]
    Dev,
    Small,
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Dev => write!(f, "dev"),
            Size::Small => write!(f, "small"),
        }
    }
}

/// What happens to a component's connection secret when its vendor resource goes away.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Leave the secret to owner-reference garbage collection
    NoPolicy,
    /// Delete the secret
    Purge,
    /// Copy the secret to an unowned backup
    #[default]
    Retain,
}

/// Overrides shared by every component
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the vendor resource (defaults to `wandb-<component>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the vendor resource (defaults to the parent's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default)]
    pub retention_policy: RetentionPolicy,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            namespace: None,
            storage_size: None,
            replicas: None,
            resources: None,
            retention_policy: RetentionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MySqlInfraSpec {
    #[serde(flatten)]
    pub common: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxysql: Option<ProxySqlInfraSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySqlInfraSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisInfraSpec {
    #[serde(flatten)]
    pub common: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<RedisSentinelInfraSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelInfraSpec {
    /// Sentinel + replication instead of standalone (defaults per size)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaInfraSpec {
    #[serde(flatten)]
    pub common: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_config: Option<KafkaReplicationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaReplicationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_replication_factor: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_in_sync_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets_topic_rf: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_state_rf: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_state_isr: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MinioInfraSpec {
    #[serde(flatten)]
    pub common: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes_per_server: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseInfraSpec {
    #[serde(flatten)]
    pub common: ComponentSpec,

    /// ClickHouse server image tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Status of the WeightsAndBiases resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WandbStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub state: InfraState,

    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub mysql_status: InfraStatus,

    #[serde(default)]
    pub redis_status: InfraStatus,

    #[serde(default)]
    pub kafka_status: InfraStatus,

    #[serde(default)]
    pub minio_status: InfraStatus,

    #[serde(default)]
    pub clickhouse_status: InfraStatus,
}

/// Status of one infrastructure component
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub state: InfraState,

    /// Serialized as null when absent so a merge patch clears it
    #[serde(default)]
    pub connection: Option<InfraConnection>,

    #[serde(default)]
    pub conditions: Vec<InfraCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
}

/// Where applications read a component's connection URL from
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfraConnection {
    pub url: SecretKeyRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

fn default_true() -> bool {
    true
}
