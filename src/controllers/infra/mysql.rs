//! Percona XtraDB Cluster, optionally fronted by ProxySQL

use super::{ComponentReconciler, Observation, Signal};
use crate::conditions::{ConditionStatus, REASON_UNKNOWN};
use crate::connection::{
    apply_retention, common_labels, owner_reference, publish_connection, ConnectionInfo,
};
use crate::crd::percona::{
    PerconaXtraDBCluster, ProxySpec, PxcNodeSpec, PxcSpec, UnsafeFlags, VolumeSpec,
};
use crate::crd::WeightsAndBiases;
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, CrudAction, ResourceGateway};
use crate::names::NameBuilder;
use crate::presets::{MySqlConfig, PROXYSQL_IMAGE, PXC_CR_VERSION};
use crate::state::{ComponentRules, ConditionKind, InfraState};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info_span, Span};

pub const MYSQL_CUSTOM_RESOURCE: &str = "MySQLCustomResource";
pub const MYSQL_CONNECTION_INFO: &str = "MySQLConnectionInfo";
pub const MYSQL_REPORTED_READY: &str = "MySQLReportedReady";

pub const MYSQL_PORT: u16 = 3306;

pub static RULES: ComponentRules = ComponentRules {
    component: "mysql",
    connection_type: MYSQL_CONNECTION_INFO,
    kinds: &[
        (MYSQL_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (MYSQL_CONNECTION_INFO, ConditionKind::ConnectionInfo),
        (
            MYSQL_REPORTED_READY,
            ConditionKind::Reported {
                on_false: &[
                    ("initializing", InfraState::Pending),
                    ("error", InfraState::Error),
                ],
                otherwise: InfraState::Unavailable,
            },
        ),
    ],
};

fn volume_spec(config: &MySqlConfig) -> VolumeSpec {
    VolumeSpec {
        persistent_volume_claim: PersistentVolumeClaimSpec {
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
    }
}

pub fn build_cluster(config: &MySqlConfig, parent: &WeightsAndBiases) -> PerconaXtraDBCluster {
    let names = &config.common.names;

    let proxysql = if config.proxysql_enabled {
        ProxySpec {
            enabled: true,
            size: config.proxysql_replicas,
            image: Some(PROXYSQL_IMAGE.to_string()),
            resources: config.common.resources.clone(),
            volume_spec: Some(volume_spec(config)),
        }
    } else {
        ProxySpec::default()
    };

    PerconaXtraDBCluster {
        metadata: ObjectMeta {
            name: Some(names.vendor_name().to_string()),
            namespace: Some(names.namespace().to_string()),
            labels: Some(common_labels("mysql", names.vendor_name())),
            owner_references: Some(vec![owner_reference(parent, true)]),
            ..Default::default()
        },
        spec: PxcSpec {
            cr_version: PXC_CR_VERSION.to_string(),
            unsafe_flags: config.allow_unsafe.then(|| UnsafeFlags {
                pxc_size: true,
                proxy_size: true,
                proxy: true,
            }),
            pxc: PxcNodeSpec {
                size: config.common.replicas,
                image: config.pxc_image.clone(),
                resources: config.common.resources.clone(),
                volume_spec: volume_spec(config),
            },
            haproxy: Some(ProxySpec::default()),
            proxysql: Some(proxysql),
        },
        status: None,
    }
}

/// Map the PXC app state; an empty state yields no report.
pub fn reported_ready(cluster: &PerconaXtraDBCluster) -> Option<Signal> {
    let state = cluster.app_state().filter(|s| !s.is_empty())?;
    let message = cluster
        .status
        .as_ref()
        .and_then(|s| s.message.as_ref())
        .map(|m| m.join("; "))
        .unwrap_or_default();
    let (status, reason) = match state.to_ascii_lowercase().as_str() {
        "ready" => (ConditionStatus::True, "ready".to_string()),
        "init" => (ConditionStatus::False, "initializing".to_string()),
        "error" => (ConditionStatus::False, "error".to_string()),
        "paused" | "stopping" => (ConditionStatus::False, state.to_ascii_lowercase()),
        _ => (ConditionStatus::Unknown, REASON_UNKNOWN.to_string()),
    };
    Some(Signal::reported(MYSQL_REPORTED_READY, status, reason, message))
}

/// `mysql://<user>@<host>:3306`, through ProxySQL when the cluster runs it.
pub fn mysql_connection(names: &NameBuilder, user: &str, proxysql: bool) -> ConnectionInfo {
    let service = if proxysql {
        names.proxysql_service_name()
    } else {
        names.pxc_service_name()
    };
    ConnectionInfo::new(format!(
        "mysql://{}@{}:{}",
        user,
        names.service_dns(&service),
        MYSQL_PORT
    ))
}

pub struct MySqlReconciler<'a, G> {
    gateway: &'a G,
    parent: &'a WeightsAndBiases,
    config: MySqlConfig,
    span: Span,
}

impl<'a, G: ResourceGateway> MySqlReconciler<'a, G> {
    pub fn new(gateway: &'a G, parent: &'a WeightsAndBiases, config: MySqlConfig) -> Self {
        let span = info_span!(
            "infra",
            component = "mysql",
            name = %config.common.names.vendor_key()
        );
        Self {
            gateway,
            parent,
            config,
            span,
        }
    }
}

#[async_trait]
impl<'a, G: ResourceGateway> ComponentReconciler for MySqlReconciler<'a, G> {
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
        let actual: Option<PerconaXtraDBCluster> =
            get_resource(self.gateway, &names.vendor_key(), "PerconaXtraDBCluster").await?;
        let desired = self
            .config
            .common
            .enabled
            .then(|| build_cluster(&self.config, self.parent));
        let action = crud_resource(self.gateway, desired.as_ref(), actual.as_ref()).await?;

        let mut observation = Observation::default();
        match (action, actual.as_ref()) {
            (CrudAction::Update, Some(cluster)) => {
                let info = mysql_connection(names, &self.config.user, cluster.proxysql_enabled());
                let connection =
                    publish_connection(self.gateway, names, "mysql", self.parent, &info).await?;
                observation.push(Signal::ConnectionInfo {
                    condition_type: MYSQL_CONNECTION_INFO,
                    secret: Some(connection.url.name.clone()),
                });
                observation.connection = Some(connection);
                if let Some(reported) = reported_ready(cluster) {
                    observation.push(reported);
                }
            }
            (CrudAction::Delete, _) => {
                apply_retention(self.gateway, names, "mysql", self.config.common.retention).await?;
            }
            _ => {}
        }
        observation.push(Signal::lifecycle(MYSQL_CUSTOM_RESOURCE, action));
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::find_condition;
    use crate::config::OperatorConfig;
    use crate::controllers::infra::run_component;
    use crate::crd::{InfraStatus, MySqlInfraSpec, Size};
    use crate::gateway::memory::MemoryGateway;
    use crate::presets::resolve_mysql;
    use crate::testing::test_parent;
    use k8s_openapi::api::core::v1::Secret;
    use serde_json::json;
    use std::time::Duration;

    const EXPIRY: Duration = Duration::from_secs(7200);

    fn config(size: Size) -> MySqlConfig {
        resolve_mysql(size, &MySqlInfraSpec::default(), "wandb", &OperatorConfig::default()).unwrap()
    }

    fn with_state(state: &str) -> PerconaXtraDBCluster {
        let mut cluster = build_cluster(&config(Size::Dev), &test_parent());
        cluster.status = serde_json::from_value(json!({ "state": state })).unwrap();
        cluster
    }

    #[test]
    fn test_dev_cluster_runs_without_proxy() {
        let cluster = build_cluster(&config(Size::Dev), &test_parent());
        assert_eq!(cluster.spec.cr_version, "1.18.0");
        assert!(!cluster.proxysql_enabled());
        assert!(cluster.spec.unsafe_flags.is_some());
        assert!(!cluster.spec.haproxy.unwrap().enabled);
    }

    #[test]
    fn test_small_cluster_uses_proxysql() {
        let cluster = build_cluster(&config(Size::Small), &test_parent());
        assert!(cluster.proxysql_enabled());
        assert_eq!(cluster.spec.pxc.size, 3);
        assert_eq!(cluster.spec.proxysql.unwrap().size, 3);
        assert!(cluster.spec.unsafe_flags.is_none());
    }

    #[test]
    fn test_state_projection() {
        let project = |state: &str| {
            let condition = reported_ready(&with_state(state)).unwrap().into_condition();
            RULES.kind_of(MYSQL_REPORTED_READY).unwrap().project(&condition)
        };
        assert_eq!(project("ready"), InfraState::Healthy);
        assert_eq!(project("init"), InfraState::Pending);
        assert_eq!(project("paused"), InfraState::Unavailable);
        assert_eq!(project("stopping"), InfraState::Unavailable);
        assert_eq!(project("error"), InfraState::Error);
        assert!(reported_ready(&with_state("")).is_none());
    }

    #[test]
    fn test_connection_host_follows_proxysql() {
        let names = NameBuilder::new("wandb", "wandb-mysql");
        assert_eq!(
            mysql_connection(&names, "root", false).url(),
            "mysql://root@wandb-mysql-pxc.wandb.svc.cluster.local:3306"
        );
        assert_eq!(
            mysql_connection(&names, "root", true).url(),
            "mysql://root@wandb-mysql-proxysql.wandb.svc.cluster.local:3306"
        );
    }

    #[tokio::test]
    async fn test_initializing_cluster_is_pending() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        gw.insert(&with_state("init"));
        let reconciler = MySqlReconciler::new(&gw, &parent, config(Size::Dev));
        let outcome = run_component(&reconciler, &InfraStatus::default(), 1, EXPIRY).await;

        assert_eq!(outcome.status.state, InfraState::Pending);
        let reported = find_condition(&outcome.status.conditions, MYSQL_REPORTED_READY).unwrap();
        assert_eq!(reported.reason, "initializing");
        assert!(gw.fetch::<Secret>("wandb", "wandb-mysql-connection").is_some());
    }
}
