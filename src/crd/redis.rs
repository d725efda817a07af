//! Opstree Redis, RedisSentinel and RedisReplication
//! (redis.redis.opstreelabs.in/v1beta2)

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "redis.redis.opstreelabs.in",
    version = "v1beta2",
    kind = "Redis",
    plural = "redis",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    pub kubernetes_config: KubernetesConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<RedisStorage>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "redis.redis.opstreelabs.in",
    version = "v1beta2",
    kind = "RedisSentinel",
    plural = "redissentinels",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    pub cluster_size: i32,

    pub kubernetes_config: KubernetesConfig,

    pub redis_sentinel_config: RedisSentinelConfig,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "redis.redis.opstreelabs.in",
    version = "v1beta2",
    kind = "RedisReplication",
    plural = "redisreplications",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RedisReplicationSpec {
    pub cluster_size: i32,

    pub kubernetes_config: KubernetesConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<RedisStorage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisStorage {
    pub volume_claim_template: PersistentVolumeClaim,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelConfig {
    pub redis_replication_name: String,

    pub master_group_name: String,
}
