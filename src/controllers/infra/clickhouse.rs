//! Altinity ClickHouseInstallation

use super::{ComponentReconciler, Observation, Signal};
use crate::conditions::{
    ConditionStatus, REASON_NOT_READY, REASON_RESOURCE_ERROR, REASON_RESOURCE_EXISTS, REASON_UNKNOWN,
};
use crate::connection::{
    apply_retention, common_labels, ensure_password, owner_reference, publish_connection,
    ConnectionInfo,
};
use crate::crd::clickhouse::{
    ChiCluster, ChiConfiguration, ChiDefaultTemplates, ChiDefaults, ChiLayout, ChiPodTemplate,
    ChiSpec, ChiTemplates, ChiVolumeClaimTemplate, ClickHouseInstallation,
};
use crate::crd::WeightsAndBiases;
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, CrudAction, ResourceGateway};
use crate::names::NameBuilder;
use crate::presets::ClickHouseConfig;
use crate::state::{ComponentRules, ConditionKind, InfraState};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimSpec, Pod, PodSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info_span, Span};

pub const CLICKHOUSE_CUSTOM_RESOURCE: &str = "ClickHouseCustomResource";
pub const CLICKHOUSE_CONNECTION_INFO: &str = "ClickHouseConnectionInfo";
pub const CLICKHOUSE_REPORTED_READY: &str = "ClickHouseReportedReady";

pub const CLICKHOUSE_NATIVE_PORT: u16 = 9000;
const CLUSTER_NAME: &str = "cluster";
const SHARDS: i32 = 1;
const VOLUME_TEMPLATE: &str = "default-volume";
const POD_TEMPLATE: &str = "default-pod";

pub static RULES: ComponentRules = ComponentRules {
    component: "clickhouse",
    connection_type: CLICKHOUSE_CONNECTION_INFO,
    kinds: &[
        (CLICKHOUSE_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (CLICKHOUSE_CONNECTION_INFO, ConditionKind::ConnectionInfo),
        (
            CLICKHOUSE_REPORTED_READY,
            ConditionKind::Reported {
                on_false: &[(REASON_RESOURCE_ERROR, InfraState::Error)],
                otherwise: InfraState::Degraded,
            },
        ),
    ],
};

fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn build_installation(
    config: &ClickHouseConfig,
    parent: &WeightsAndBiases,
    password: &str,
) -> ClickHouseInstallation {
    let names = &config.common.names;

    let mut users = BTreeMap::new();
    users.insert(
        format!("{}/password_sha256_hex", config.user),
        sha256_hex(password),
    );
    users.insert(format!("{}/networks/ip", config.user), "::/0".to_string());

    let pod_templates = match &config.common.resources {
        Some(resources) => vec![ChiPodTemplate {
            name: POD_TEMPLATE.to_string(),
            spec: PodSpec {
                containers: vec![Container {
                    name: "clickhouse".to_string(),
                    image: Some(format!("clickhouse/clickhouse-server:{}", config.version)),
                    resources: Some(resources.clone()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        }],
        None => Vec::new(),
    };

    ClickHouseInstallation {
        metadata: ObjectMeta {
            name: Some(names.vendor_name().to_string()),
            namespace: Some(names.namespace().to_string()),
            labels: Some(common_labels("clickhouse", names.vendor_name())),
            owner_references: Some(vec![owner_reference(parent, true)]),
            ..Default::default()
        },
        spec: ChiSpec {
            configuration: ChiConfiguration {
                users,
                clusters: vec![ChiCluster {
                    name: CLUSTER_NAME.to_string(),
                    layout: ChiLayout {
                        shards_count: SHARDS,
                        replicas_count: config.common.replicas,
                    },
                }],
            },
            defaults: ChiDefaults {
                templates: ChiDefaultTemplates {
                    data_volume_claim_template: Some(VOLUME_TEMPLATE.to_string()),
                    pod_template: (!pod_templates.is_empty()).then(|| POD_TEMPLATE.to_string()),
                },
            },
            templates: ChiTemplates {
                volume_claim_templates: vec![ChiVolumeClaimTemplate {
                    name: VOLUME_TEMPLATE.to_string(),
                    spec: PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        resources: Some(VolumeResourceRequirements {
                            requests: Some(BTreeMap::from([(
                                "storage".to_string(),
                                config.common.storage_size.clone(),
                            )])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                }],
                pod_templates,
            },
        },
        status: None,
    }
}

/// Pods running out of pods listed; zero pods listed is unknown.
pub fn reported_ready(running: usize, total: usize) -> Signal {
    let message = format!("{} of {} pods running", running, total);
    if total == 0 {
        Signal::reported(CLICKHOUSE_REPORTED_READY, ConditionStatus::Unknown, REASON_UNKNOWN, "")
    } else if running == total {
        Signal::reported(
            CLICKHOUSE_REPORTED_READY,
            ConditionStatus::True,
            REASON_RESOURCE_EXISTS,
            message,
        )
    } else {
        Signal::reported(
            CLICKHOUSE_REPORTED_READY,
            ConditionStatus::False,
            REASON_NOT_READY,
            message,
        )
    }
}

/// `clickhouse://<user>@clickhouse-<name>.<ns>.svc.cluster.local:9000`
pub fn clickhouse_connection(names: &NameBuilder, user: &str) -> ConnectionInfo {
    ConnectionInfo::new(format!(
        "clickhouse://{}@{}:{}",
        user,
        names.service_dns(&names.clickhouse_service_name()),
        CLICKHOUSE_NATIVE_PORT
    ))
}

pub struct ClickHouseReconciler<'a, G> {
    gateway: &'a G,
    parent: &'a WeightsAndBiases,
    config: ClickHouseConfig,
    span: Span,
}

impl<'a, G: ResourceGateway> ClickHouseReconciler<'a, G> {
    pub fn new(gateway: &'a G, parent: &'a WeightsAndBiases, config: ClickHouseConfig) -> Self {
        let span = info_span!(
            "infra",
            component = "clickhouse",
            name = %config.common.names.vendor_key()
        );
        Self {
            gateway,
            parent,
            config,
            span,
        }
    }

    async fn count_running(&self, installation: &ClickHouseInstallation) -> Result<(usize, usize)> {
        let names = &self.config.common.names;
        let pods = installation.pod_names();
        let mut running = 0;
        for pod_name in pods {
            let pod: Option<Pod> = get_resource(self.gateway, &names.key(pod_name.clone()), "ClickHousePod").await?;
            if pod
                .and_then(|p| p.status)
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Running")
            {
                running += 1;
            }
        }
        debug!(running, total = pods.len(), "ClickHouse pods status");
        Ok((running, pods.len()))
    }
}

#[async_trait]
impl<'a, G: ResourceGateway> ComponentReconciler for ClickHouseReconciler<'a, G> {
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
        let actual: Option<ClickHouseInstallation> =
            get_resource(self.gateway, &names.vendor_key(), "ClickHouseInstallation").await?;

        let desired = if self.config.common.enabled {
            let password = ensure_password(
                self.gateway,
                names,
                "clickhouse",
                owner_reference(self.parent, false),
            )
            .await?;
            Some(build_installation(&self.config, self.parent, &password))
        } else {
            None
        };
        let action = crud_resource(self.gateway, desired.as_ref(), actual.as_ref()).await?;

        let mut observation = Observation::default();
        match (action, actual.as_ref()) {
            (CrudAction::Update, Some(installation)) => {
                let info = clickhouse_connection(names, &self.config.user);
                let connection =
                    publish_connection(self.gateway, names, "clickhouse", self.parent, &info).await?;
                observation.push(Signal::ConnectionInfo {
                    condition_type: CLICKHOUSE_CONNECTION_INFO,
                    secret: Some(connection.url.name.clone()),
                });
                observation.connection = Some(connection);

                let (running, total) = self.count_running(installation).await?;
                observation.push(reported_ready(running, total));
            }
            (CrudAction::Delete, _) => {
                apply_retention(self.gateway, names, "clickhouse", self.config.common.retention)
                    .await?;
            }
            _ => {}
        }
        observation.push(Signal::lifecycle(CLICKHOUSE_CUSTOM_RESOURCE, action));
        Ok(observation)
    }
}
