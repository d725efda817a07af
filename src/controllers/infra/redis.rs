//! Opstree Redis: standalone, or sentinel plus replication
//!
//! Exactly one shape may exist at a time. The standalone shape is driven
//! first; when the wanted shape finds the other one present at read time
//! its creation is refused for the tick and a `DeploymentConflict` fault is
//! raised. The unwanted shape is deleted in the same tick, so the switch
//! completes on the following one.

use super::{ComponentReconciler, Observation, Signal};
use crate::conditions::{
    ConditionStatus, REASON_DEPLOYMENT_CONFLICT, REASON_NOT_READY, REASON_RESOURCE_EXISTS,
};
use crate::connection::{
    apply_retention, common_labels, owner_reference, publish_connection, ConnectionInfo,
};
use crate::crd::redis::{
    KubernetesConfig, Redis, RedisReplication, RedisReplicationSpec, RedisSentinel,
    RedisSentinelConfig, RedisSentinelSpec, RedisSpec, RedisStorage,
};
use crate::crd::WeightsAndBiases;
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, CrudAction, ObjectKey, ResourceGateway};
use crate::names::NameBuilder;
use crate::presets::{RedisConfig, SentinelConfig, REDIS_IMAGE, REDIS_SENTINEL_IMAGE};
use crate::state::{ComponentRules, ConditionKind, InfraState};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info_span, warn, Span};

pub const REDIS_STANDALONE_CUSTOM_RESOURCE: &str = "RedisStandaloneCustomResource";
pub const REDIS_SENTINEL_CUSTOM_RESOURCE: &str = "RedisSentinelCustomResource";
pub const REDIS_REPLICATION_CUSTOM_RESOURCE: &str = "RedisReplicationCustomResource";
pub const REDIS_CONNECTION_INFO: &str = "RedisConnectionInfo";
pub const REDIS_REPORTED_READY: &str = "RedisReportedReady";
pub const REDIS_DEPLOYMENT: &str = "RedisDeployment";

pub const REDIS_PORT: u16 = 6379;
pub const SENTINEL_PORT: u16 = 26379;

const REASON_SINGLE_DEPLOYMENT: &str = "SingleDeployment";
const REASON_DEGRADED: &str = "degraded";

const REPORTED: ConditionKind = ConditionKind::Reported {
    on_false: &[(REASON_DEGRADED, InfraState::Degraded)],
    otherwise: InfraState::Unavailable,
};

pub static STANDALONE_RULES: ComponentRules = ComponentRules {
    component: "redis",
    connection_type: REDIS_CONNECTION_INFO,
    kinds: &[
        (REDIS_STANDALONE_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (REDIS_CONNECTION_INFO, ConditionKind::ConnectionInfo),
        (REDIS_REPORTED_READY, REPORTED),
        (REDIS_DEPLOYMENT, ConditionKind::Fault),
    ],
};

pub static HA_RULES: ComponentRules = ComponentRules {
    component: "redis",
    connection_type: REDIS_CONNECTION_INFO,
    kinds: &[
        (REDIS_SENTINEL_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (REDIS_REPLICATION_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (REDIS_CONNECTION_INFO, ConditionKind::ConnectionInfo),
        (REDIS_REPORTED_READY, REPORTED),
        (REDIS_DEPLOYMENT, ConditionKind::Fault),
    ],
};

fn metadata(names: &NameBuilder, name: String, parent: &WeightsAndBiases) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(names.namespace().to_string()),
        labels: Some(common_labels("redis", names.vendor_name())),
        owner_references: Some(vec![owner_reference(parent, true)]),
        ..Default::default()
    }
}

fn storage(config: &RedisConfig) -> RedisStorage {
    RedisStorage {
        volume_claim_template: PersistentVolumeClaim {
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        config.common.storage_size.clone(),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    }
}

pub fn build_standalone(config: &RedisConfig, parent: &WeightsAndBiases) -> Redis {
    let names = &config.common.names;
    Redis {
        metadata: metadata(names, names.vendor_name().to_string(), parent),
        spec: RedisSpec {
            kubernetes_config: KubernetesConfig {
                image: REDIS_IMAGE.to_string(),
                resources: config.common.resources.clone(),
            },
            storage: Some(storage(config)),
        },
    }
}

pub fn build_sentinel(
    config: &RedisConfig,
    sentinel: &SentinelConfig,
    parent: &WeightsAndBiases,
) -> RedisSentinel {
    let names = &config.common.names;
    RedisSentinel {
        metadata: metadata(names, names.vendor_name().to_string(), parent),
        spec: RedisSentinelSpec {
            cluster_size: sentinel.replicas,
            kubernetes_config: KubernetesConfig {
                image: REDIS_SENTINEL_IMAGE.to_string(),
                resources: sentinel.resources.clone(),
            },
            redis_sentinel_config: RedisSentinelConfig {
                redis_replication_name: names.replication_name(),
                master_group_name: sentinel.master_name.clone(),
            },
        },
    }
}

pub fn build_replication(config: &RedisConfig, parent: &WeightsAndBiases) -> RedisReplication {
    let names = &config.common.names;
    RedisReplication {
        metadata: metadata(names, names.replication_name(), parent),
        spec: RedisReplicationSpec {
            cluster_size: config.common.replicas,
            kubernetes_config: KubernetesConfig {
                image: REDIS_IMAGE.to_string(),
                resources: config.common.resources.clone(),
            },
            storage: Some(storage(config)),
        },
    }
}

/// `redis://<name>...:6379`, or the sentinel endpoint with its master name.
pub fn redis_connection(names: &NameBuilder, sentinel: Option<&SentinelConfig>) -> ConnectionInfo {
    match sentinel {
        Some(sentinel) => ConnectionInfo::new(format!(
            "redis://{}:{}?master={}",
            names.service_dns(&names.sentinel_service_name()),
            SENTINEL_PORT,
            sentinel.master_name
        )),
        None => ConnectionInfo::new(format!(
            "redis://{}:{}",
            names.service_dns(names.vendor_name()),
            REDIS_PORT
        )),
    }
}

/// Readiness from running pod counts per side, as `(running, expected)`.
pub fn reported_ready(sides: &[(usize, usize)]) -> Signal {
    let message = sides
        .iter()
        .map(|(running, expected)| format!("{}/{}", running, expected))
        .collect::<Vec<_>>()
        .join(", ");
    let (status, reason) = if sides.iter().any(|(running, _)| *running == 0) {
        (ConditionStatus::False, REASON_NOT_READY)
    } else if sides.iter().any(|(running, expected)| running < expected) {
        (ConditionStatus::False, REASON_DEGRADED)
    } else {
        (ConditionStatus::True, REASON_RESOURCE_EXISTS)
    };
    Signal::reported(
        REDIS_REPORTED_READY,
        status,
        reason,
        format!("pods running: {}", message),
    )
}

fn conflict(wanted: &str, present: &str) -> Signal {
    Signal::Fault {
        condition_type: REDIS_DEPLOYMENT,
        status: ConditionStatus::False,
        reason: REASON_DEPLOYMENT_CONFLICT.to_string(),
        message: format!("{} requested while {} exists", wanted, present),
    }
}

fn single_deployment() -> Signal {
    Signal::Fault {
        condition_type: REDIS_DEPLOYMENT,
        status: ConditionStatus::True,
        reason: REASON_SINGLE_DEPLOYMENT.to_string(),
        message: String::new(),
    }
}

pub struct RedisReconciler<'a, G> {
    gateway: &'a G,
    parent: &'a WeightsAndBiases,
    config: RedisConfig,
    span: Span,
}

impl<'a, G: ResourceGateway> RedisReconciler<'a, G> {
    pub fn new(gateway: &'a G, parent: &'a WeightsAndBiases, config: RedisConfig) -> Self {
        let span = info_span!(
            "infra",
            component = "redis",
            name = %config.common.names.vendor_key()
        );
        Self {
            gateway,
            parent,
            config,
            span,
        }
    }

    fn names(&self) -> &NameBuilder {
        &self.config.common.names
    }

    async fn count_running(&self, pod_names: impl Iterator<Item = String>) -> Result<usize> {
        let mut running = 0;
        for name in pod_names {
            let pod: Option<Pod> = get_resource(self.gateway, &self.names().key(name), "RedisPod").await?;
            if pod
                .and_then(|p| p.status)
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Running")
            {
                running += 1;
            }
        }
        Ok(running)
    }

    async fn publish(&self, observation: &mut Observation) -> Result<()> {
        let info = redis_connection(self.names(), self.config.sentinel.as_ref());
        let connection = publish_connection(self.gateway, self.names(), "redis", self.parent, &info).await?;
        observation.push(Signal::ConnectionInfo {
            condition_type: REDIS_CONNECTION_INFO,
            secret: Some(connection.url.name.clone()),
        });
        observation.connection = Some(connection);
        Ok(())
    }
}

#[async_trait]
impl<'a, G: ResourceGateway> ComponentReconciler for RedisReconciler<'a, G> {
    fn rules(&self) -> &'static ComponentRules {
        if self.config.sentinel.is_some() {
            &HA_RULES
        } else {
            &STANDALONE_RULES
        }
    }

    fn enabled(&self) -> bool {
        self.config.common.enabled
    }

    fn span(&self) -> &Span {
        &self.span
    }

    async fn observe(&self) -> Result<Observation> {
        let names = self.names();
        let replication_key: ObjectKey = names.key(names.replication_name());

        let standalone: Option<Redis> = get_resource(self.gateway, &names.vendor_key(), "Redis").await?;
        let sentinel: Option<RedisSentinel> =
            get_resource(self.gateway, &names.vendor_key(), "RedisSentinel").await?;
        let replication: Option<RedisReplication> =
            get_resource(self.gateway, &replication_key, "RedisReplication").await?;

        let enabled = self.config.common.enabled;
        let wants_ha = enabled && self.config.sentinel.is_some();
        let wants_standalone = enabled && self.config.sentinel.is_none();
        let ha_present = sentinel.is_some() || replication.is_some();

        let mut observation = Observation::default();
        let mut deleted = false;

        // readiness and connection describe the endpoint of the shape being replaced
        if (wants_ha && standalone.is_some()) || (wants_standalone && ha_present) {
            observation.retired.push(REDIS_REPORTED_READY);
            observation.retired.push(REDIS_CONNECTION_INFO);
        }

        // standalone shape
        let standalone_action = if wants_standalone && ha_present && standalone.is_none() {
            warn!(component = "redis", code = REASON_DEPLOYMENT_CONFLICT, "Standalone Redis refused while sentinel deployment exists");
            observation.push(conflict("standalone", "sentinel"));
            CrudAction::None
        } else {
            let desired = wants_standalone.then(|| build_standalone(&self.config, self.parent));
            crud_resource(self.gateway, desired.as_ref(), standalone.as_ref()).await?
        };
        deleted |= standalone_action == CrudAction::Delete;

        // sentinel + replication shape
        let (sentinel_action, replication_action) = if wants_ha && standalone.is_some() {
            warn!(component = "redis", code = REASON_DEPLOYMENT_CONFLICT, "Sentinel Redis refused while standalone deployment exists");
            observation.push(conflict("sentinel", "standalone"));
            (CrudAction::None, CrudAction::None)
        } else {
            let desired_sentinel = match (&self.config.sentinel, wants_ha) {
                (Some(sentinel), true) => Some(build_sentinel(&self.config, sentinel, self.parent)),
                _ => None,
            };
            let desired_replication = wants_ha.then(|| build_replication(&self.config, self.parent));
            (
                crud_resource(self.gateway, desired_sentinel.as_ref(), sentinel.as_ref()).await?,
                crud_resource(self.gateway, desired_replication.as_ref(), replication.as_ref()).await?,
            )
        };
        deleted |= sentinel_action == CrudAction::Delete || replication_action == CrudAction::Delete;

        let conflicted = observation
            .signals
            .iter()
            .any(|s| matches!(s, Signal::Fault { .. }));
        if enabled && !conflicted {
            observation.push(single_deployment());
        }

        match &self.config.sentinel {
            Some(sentinel_config) if wants_ha => {
                observation.retired.push(REDIS_STANDALONE_CUSTOM_RESOURCE);
                observation.push(Signal::lifecycle(REDIS_SENTINEL_CUSTOM_RESOURCE, sentinel_action));
                observation.push(Signal::lifecycle(REDIS_REPLICATION_CUSTOM_RESOURCE, replication_action));
                if sentinel_action == CrudAction::Update && replication_action == CrudAction::Update {
                    self.publish(&mut observation).await?;
                    let sentinel_running = self
                        .count_running((0..sentinel_config.replicas).map(|i| {
                            format!("{}-{}", names.sentinel_service_name(), i)
                        }))
                        .await?;
                    let replication_running = self
                        .count_running((0..self.config.common.replicas).map(|i| {
                            format!("{}-{}", names.replication_name(), i)
                        }))
                        .await?;
                    observation.push(reported_ready(&[
                        (sentinel_running, sentinel_config.replicas as usize),
                        (replication_running, self.config.common.replicas as usize),
                    ]));
                }
            }
            _ => {
                observation.retired.push(REDIS_SENTINEL_CUSTOM_RESOURCE);
                observation.retired.push(REDIS_REPLICATION_CUSTOM_RESOURCE);
                observation.push(Signal::lifecycle(REDIS_STANDALONE_CUSTOM_RESOURCE, standalone_action));
                if standalone_action == CrudAction::Update {
                    self.publish(&mut observation).await?;
                    let running = self
                        .count_running(std::iter::once(format!("{}-0", names.vendor_name())))
                        .await?;
                    observation.push(reported_ready(&[(running, 1)]));
                }
            }
        }

        if deleted && !enabled {
            apply_retention(self.gateway, names, "redis", self.config.common.retention).await?;
        }
        Ok(observation)
    }
}
