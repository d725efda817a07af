//! Size presets
//!
//! Projects the parent's `size` onto per-component defaults and merges the
//! user's overrides on top. Storage quantities are validated here so a
//! malformed spec is rejected before anything is written to the cluster.

use crate::config::OperatorConfig;
use crate::crd::{
    ClickHouseInfraSpec, ComponentSpec, KafkaInfraSpec, MinioInfraSpec, MySqlInfraSpec,
    RedisInfraSpec, RetentionPolicy, Size,
};
use crate::error::{OperatorError, Result};
use crate::names::NameBuilder;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static QUANTITY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E|m)?$").unwrap());

pub const DEFAULT_CLICKHOUSE_NAME: &str = "wandb-clickhouse";
pub const DEFAULT_KAFKA_NAME: &str = "wandb-kafka";
pub const DEFAULT_MINIO_NAME: &str = "wandb-minio";
pub const DEFAULT_MYSQL_NAME: &str = "wandb-mysql";
pub const DEFAULT_REDIS_NAME: &str = "wandb-redis";

pub const CLICKHOUSE_VERSION: &str = "23.8";
pub const KAFKA_VERSION: &str = "4.1.0";
pub const KAFKA_METADATA_VERSION: &str = "4.1-IV0";
pub const MINIO_IMAGE: &str = "quay.io/minio/minio:latest";
pub const DEV_PXC_IMAGE: &str = "perconalab/percona-xtradb-cluster-operator:main-pxc8.0";
pub const SMALL_PXC_IMAGE: &str = "percona/percona-xtradb-cluster:8.0";
pub const PROXYSQL_IMAGE: &str = "percona/proxysql2:2.7.3";
pub const PXC_CR_VERSION: &str = "1.18.0";
pub const REDIS_IMAGE: &str = "quay.io/opstree/redis:v7.0.15";
pub const REDIS_SENTINEL_IMAGE: &str = "quay.io/opstree/redis-sentinel:v7.0.15";
pub const REDIS_SENTINEL_COUNT: i32 = 3;

/// Check a storage size against the Kubernetes quantity grammar.
pub fn parse_quantity(component: &str, value: &str) -> Result<Quantity> {
    if QUANTITY_REGEX.is_match(value) {
        Ok(Quantity(value.to_string()))
    } else {
        Err(OperatorError::Configuration(format!(
            "{}: invalid storage size '{}'",
            component, value
        )))
    }
}

/// Requests and limits for CPU and memory.
pub fn resources(cpu: (&str, &str), memory: (&str, &str)) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.0.to_string())),
            ("memory".to_string(), Quantity(memory.0.to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.1.to_string())),
            ("memory".to_string(), Quantity(memory.1.to_string())),
        ])),
        ..Default::default()
    }
}

fn small_resources() -> ResourceRequirements {
    resources(("500m", "1000m"), ("1Gi", "2Gi"))
}

/// Settings every component resolves the same way
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComponent {
    pub enabled: bool,
    pub names: NameBuilder,
    pub replicas: i32,
    pub storage_size: Quantity,
    pub resources: Option<ResourceRequirements>,
    pub retention: RetentionPolicy,
}

struct PresetDefaults {
    replicas: i32,
    storage_size: &'static str,
    resources: Option<ResourceRequirements>,
}

fn resolve_common(
    component: &str,
    spec: &ComponentSpec,
    default_name: &str,
    parent_namespace: &str,
    defaults: PresetDefaults,
) -> Result<ResolvedComponent> {
    let namespace = spec
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(parent_namespace);
    let name = spec
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(default_name);

    let replicas = spec.replicas.unwrap_or(defaults.replicas);
    if replicas < 1 {
        return Err(OperatorError::Configuration(format!(
            "{}: replicas must be at least 1, got {}",
            component, replicas
        )));
    }

    let storage_size = parse_quantity(
        component,
        spec.storage_size.as_deref().unwrap_or(defaults.storage_size),
    )?;

    Ok(ResolvedComponent {
        enabled: spec.enabled,
        names: NameBuilder::new(namespace, name),
        replicas,
        storage_size,
        resources: spec.resources.clone().or(defaults.resources),
        retention: spec.retention_policy,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClickHouseConfig {
    pub common: ResolvedComponent,
    pub version: String,
    pub user: String,
}

pub fn resolve_clickhouse(
    size: Size,
    spec: &ClickHouseInfraSpec,
    namespace: &str,
    settings: &OperatorConfig,
) -> Result<ClickHouseConfig> {
    let defaults = match size {
        Size::Dev => PresetDefaults {
            replicas: 1,
            storage_size: "10Gi",
            resources: None,
        },
        Size::Small => PresetDefaults {
            replicas: 3,
            storage_size: "10Gi",
            resources: Some(small_resources()),
        },
    };
    Ok(ClickHouseConfig {
        common: resolve_common("clickhouse", &spec.common, DEFAULT_CLICKHOUSE_NAME, namespace, defaults)?,
        version: spec
            .version
            .clone()
            .unwrap_or_else(|| CLICKHOUSE_VERSION.to_string()),
        user: settings.clickhouse_user.clone(),
    })
}

/// Kafka replication settings written into the broker config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KafkaReplication {
    pub default_replication_factor: i32,
    pub min_in_sync_replicas: i32,
    pub offsets_topic_rf: i32,
    pub transaction_state_rf: i32,
    pub transaction_state_isr: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaConfig {
    pub common: ResolvedComponent,
    pub replication: KafkaReplication,
}

pub fn resolve_kafka(size: Size, spec: &KafkaInfraSpec, namespace: &str) -> Result<KafkaConfig> {
    let (defaults, replication) = match size {
        Size::Dev => (
            PresetDefaults {
                replicas: 1,
                storage_size: "1Gi",
                resources: None,
            },
            KafkaReplication {
                default_replication_factor: 1,
                min_in_sync_replicas: 1,
                offsets_topic_rf: 1,
                transaction_state_rf: 1,
                transaction_state_isr: 1,
            },
        ),
        Size::Small => (
            PresetDefaults {
                replicas: 3,
                storage_size: "5Gi",
                resources: Some(small_resources()),
            },
            KafkaReplication {
                default_replication_factor: 3,
                min_in_sync_replicas: 2,
                offsets_topic_rf: 3,
                transaction_state_rf: 3,
                transaction_state_isr: 2,
            },
        ),
    };

    let replication = match &spec.replication_config {
        Some(overrides) => KafkaReplication {
            default_replication_factor: overrides
                .default_replication_factor
                .unwrap_or(replication.default_replication_factor),
            min_in_sync_replicas: overrides
                .min_in_sync_replicas
                .unwrap_or(replication.min_in_sync_replicas),
            offsets_topic_rf: overrides.offsets_topic_rf.unwrap_or(replication.offsets_topic_rf),
            transaction_state_rf: overrides
                .transaction_state_rf
                .unwrap_or(replication.transaction_state_rf),
            transaction_state_isr: overrides
                .transaction_state_isr
                .unwrap_or(replication.transaction_state_isr),
        },
        None => replication,
    };

    Ok(KafkaConfig {
        common: resolve_common("kafka", &spec.common, DEFAULT_KAFKA_NAME, namespace, defaults)?,
        replication,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinioConfig {
    pub common: ResolvedComponent,
    pub volumes_per_server: i32,
    pub image: String,
    pub root_user: String,
}

pub fn resolve_minio(
    size: Size,
    spec: &MinioInfraSpec,
    namespace: &str,
    settings: &OperatorConfig,
) -> Result<MinioConfig> {
    let (defaults, volumes_per_server) = match size {
        Size::Dev => (
            PresetDefaults {
                replicas: 1,
                storage_size: "10Gi",
                resources: None,
            },
            1,
        ),
        Size::Small => (
            PresetDefaults {
                replicas: 3,
                storage_size: "10Gi",
                resources: Some(small_resources()),
            },
            4,
        ),
    };
    Ok(MinioConfig {
        common: resolve_common("minio", &spec.common, DEFAULT_MINIO_NAME, namespace, defaults)?,
        volumes_per_server: spec.volumes_per_server.unwrap_or(volumes_per_server),
        image: MINIO_IMAGE.to_string(),
        root_user: settings.minio_root_user.clone(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MySqlConfig {
    pub common: ResolvedComponent,
    pub pxc_image: String,
    pub proxysql_enabled: bool,
    pub proxysql_replicas: i32,
    pub allow_unsafe: bool,
    pub user: String,
}

pub fn resolve_mysql(
    size: Size,
    spec: &MySqlInfraSpec,
    namespace: &str,
    settings: &OperatorConfig,
) -> Result<MySqlConfig> {
    let defaults = match size {
        Size::Dev => PresetDefaults {
            replicas: 1,
            storage_size: "1Gi",
            resources: None,
        },
        Size::Small => PresetDefaults {
            replicas: 3,
            storage_size: "10Gi",
            resources: Some(small_resources()),
        },
    };
    let (pxc_image, proxysql_default, allow_unsafe) = match size {
        Size::Dev => (DEV_PXC_IMAGE, false, true),
        Size::Small => (SMALL_PXC_IMAGE, true, false),
    };
    let proxysql = spec.proxysql.clone().unwrap_or_default();
    let common = resolve_common("mysql", &spec.common, DEFAULT_MYSQL_NAME, namespace, defaults)?;
    Ok(MySqlConfig {
        proxysql_replicas: proxysql.replicas.unwrap_or(common.replicas),
        common,
        pxc_image: pxc_image.to_string(),
        proxysql_enabled: proxysql.enabled.unwrap_or(proxysql_default),
        allow_unsafe,
        user: settings.mysql_user.clone(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentinelConfig {
    pub replicas: i32,
    pub master_name: String,
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedisConfig {
    pub common: ResolvedComponent,
    /// Present when sentinel + replication replaces standalone
    pub sentinel: Option<SentinelConfig>,
}

pub fn resolve_redis(
    size: Size,
    spec: &RedisInfraSpec,
    namespace: &str,
    settings: &OperatorConfig,
) -> Result<RedisConfig> {
    let (defaults, sentinel_default, sentinel_resources) = match size {
        Size::Dev => (
            PresetDefaults {
                replicas: 1,
                storage_size: "100Mi",
                resources: None,
            },
            false,
            None,
        ),
        Size::Small => (
            PresetDefaults {
                replicas: REDIS_SENTINEL_COUNT,
                storage_size: "2Gi",
                resources: Some(resources(("250m", "500m"), ("256Mi", "512Mi"))),
            },
            true,
            Some(resources(("125m", "256m"), ("128Mi", "256Mi"))),
        ),
    };
    let common = resolve_common("redis", &spec.common, DEFAULT_REDIS_NAME, namespace, defaults)?;
    let sentinel_spec = spec.sentinel.clone().unwrap_or_default();
    let sentinel = sentinel_spec
        .enabled
        .unwrap_or(sentinel_default)
        .then(|| SentinelConfig {
            replicas: REDIS_SENTINEL_COUNT,
            master_name: sentinel_spec
                .master_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| settings.redis_master_name.clone()),
            resources: sentinel_spec.resources.clone().or(sentinel_resources),
        });
    Ok(RedisConfig { common, sentinel })
}
