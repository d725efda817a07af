//! Custom Resource Definitions
//!
//! - WeightsAndBiases: the parent resource this operator owns
//! - Vendor resources it drives: Kafka/KafkaNodePool (Strimzi), Tenant
//!   (MinIO), PerconaXtraDBCluster (Percona), ClickHouseInstallation
//!   (Altinity), Redis/RedisSentinel/RedisReplication (Opstree)

pub mod clickhouse;
pub mod kafka;
pub mod minio;
pub mod percona;
pub mod redis;
mod wandb;

pub use wandb::{
    ClickHouseInfraSpec, ComponentSpec, InfraConnection, InfraStatus, KafkaInfraSpec,
    KafkaReplicationConfig, MinioInfraSpec, MySqlInfraSpec, ProxySqlInfraSpec, RedisInfraSpec,
    RedisSentinelInfraSpec, RetentionPolicy, SecretKeyRef, Size, WandbSpec, WandbStatus,
    WeightsAndBiases,
};
