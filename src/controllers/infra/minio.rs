//! MinIO Tenant

use super::{ComponentReconciler, Observation, Signal};
use crate::conditions::{ConditionStatus, REASON_UNKNOWN};
use crate::connection::minio::{minio_connection, write_minio_config};
use crate::connection::{
    apply_retention, common_labels, owner_reference, publish_connection, KEY_ROOT_PASSWORD,
    KEY_ROOT_USER,
};
use crate::crd::minio::{LocalReference, Tenant, TenantBucket, TenantPool, TenantSpec};
use crate::crd::WeightsAndBiases;
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, CrudAction, ResourceGateway};
use crate::presets::MinioConfig;
use crate::state::{ComponentRules, ConditionKind, InfraState};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info_span, Span};

pub const MINIO_CUSTOM_RESOURCE: &str = "MinioCustomResource";
pub const MINIO_CONNECTION_INFO: &str = "MinioConnectionInfo";
pub const MINIO_REPORTED_READY: &str = "MinioReportedReady";

const BUCKET: &str = "wandb";

pub static RULES: ComponentRules = ComponentRules {
    component: "minio",
    connection_type: MINIO_CONNECTION_INFO,
    kinds: &[
        (MINIO_CUSTOM_RESOURCE, ConditionKind::Lifecycle),
        (MINIO_CONNECTION_INFO, ConditionKind::ConnectionInfo),
        (
            MINIO_REPORTED_READY,
            ConditionKind::Reported {
                on_false: &[("yellow", InfraState::Degraded), ("red", InfraState::Error)],
                otherwise: InfraState::Unavailable,
            },
        ),
    ],
};

pub fn build_tenant(config: &MinioConfig, parent: &WeightsAndBiases) -> Tenant {
    let names = &config.common.names;
    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
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
        status: None,
    };

    Tenant {
        metadata: ObjectMeta {
            name: Some(names.vendor_name().to_string()),
            namespace: Some(names.namespace().to_string()),
            labels: Some(common_labels("minio", names.vendor_name())),
            owner_references: Some(vec![owner_reference(parent, true)]),
            ..Default::default()
        },
        spec: TenantSpec {
            pools: vec![TenantPool {
                name: names.pool_name(),
                servers: config.common.replicas,
                volumes_per_server: config.volumes_per_server,
                volume_claim_template: claim,
                resources: config.common.resources.clone(),
            }],
            configuration: Some(LocalReference {
                name: names.config_name(),
            }),
            request_auto_cert: true,
            buckets: vec![TenantBucket {
                name: BUCKET.to_string(),
            }],
            image: Some(config.image.clone()),
        },
        status: None,
    }
}

/// green is ready, yellow and red are failures, anything else is unknown.
pub fn reported_ready(tenant: &Tenant) -> Signal {
    let health = tenant.health_status().unwrap_or_default();
    let (status, reason) = match health.to_ascii_lowercase().as_str() {
        "green" => (ConditionStatus::True, "green"),
        "yellow" => (ConditionStatus::False, "yellow"),
        "red" => (ConditionStatus::False, "red"),
        _ => (ConditionStatus::Unknown, REASON_UNKNOWN),
    };
    let message = tenant
        .status
        .as_ref()
        .and_then(|s| s.current_state.clone())
        .unwrap_or_default();
    Signal::reported(MINIO_REPORTED_READY, status, reason, message)
}

pub struct MinioReconciler<'a, G> {
    gateway: &'a G,
    parent: &'a WeightsAndBiases,
    config: MinioConfig,
    span: Span,
}

impl<'a, G: ResourceGateway> MinioReconciler<'a, G> {
    pub fn new(gateway: &'a G, parent: &'a WeightsAndBiases, config: MinioConfig) -> Self {
        let span = info_span!(
            "infra",
            component = "minio",
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
impl<'a, G: ResourceGateway> ComponentReconciler for MinioReconciler<'a, G> {
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
        let actual: Option<Tenant> = get_resource(self.gateway, &names.vendor_key(), "Tenant").await?;
        let desired = self
            .config
            .common
            .enabled
            .then(|| build_tenant(&self.config, self.parent));
        let action = crud_resource(self.gateway, desired.as_ref(), actual.as_ref()).await?;

        let mut observation = Observation::default();
        match (action, actual.as_ref()) {
            (CrudAction::Create | CrudAction::Update, _) => {
                let owner = owner_reference(self.parent, false);
                let env = write_minio_config(self.gateway, names, owner, &self.config.root_user).await?;

                if let Some(tenant) = actual.as_ref() {
                    let info = minio_connection(names, &env);
                    let secret = if info.is_complete(&[KEY_ROOT_USER, KEY_ROOT_PASSWORD]) {
                        let connection =
                            publish_connection(self.gateway, names, "minio", self.parent, &info).await?;
                        let name = connection.url.name.clone();
                        observation.connection = Some(connection);
                        Some(name)
                    } else {
                        None
                    };
                    observation.push(Signal::ConnectionInfo {
                        condition_type: MINIO_CONNECTION_INFO,
                        secret,
                    });
                    observation.push(reported_ready(tenant));
                }
            }
            (CrudAction::Delete, _) => {
                apply_retention(self.gateway, names, "minio", self.config.common.retention).await?;
            }
            _ => {}
        }
        observation.push(Signal::lifecycle(MINIO_CUSTOM_RESOURCE, action));
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::find_condition;
    use crate::connection::minio::MinioEnvConfig;
    use crate::connection::ConnectionInfo;
    use crate::config::OperatorConfig;
    use crate::controllers::infra::run_component;
    use crate::crd::{InfraStatus, MinioInfraSpec, Size};
    use crate::gateway::memory::MemoryGateway;
    use crate::presets::resolve_minio;
    use crate::testing::{test_parent, PARENT_UID};
    use k8s_openapi::api::core::v1::Secret;
    use serde_json::json;
    use std::time::Duration;

    const EXPIRY: Duration = Duration::from_secs(7200);

    fn config(size: Size) -> MinioConfig {
        resolve_minio(size, &MinioInfraSpec::default(), "wandb", &OperatorConfig::default()).unwrap()
    }

    fn tenant_with_health(health: &str) -> Tenant {
        let mut tenant = build_tenant(&config(Size::Dev), &test_parent());
        tenant.status = serde_json::from_value(json!({ "healthStatus": health })).unwrap();
        tenant
    }

    #[test]
    fn test_tenant_shape() {
        let tenant = build_tenant(&config(Size::Small), &test_parent());
        let pool = &tenant.spec.pools[0];
        assert_eq!(pool.name, "wandb-minio-pool");
        assert_eq!(pool.servers, 3);
        assert_eq!(pool.volumes_per_server, 4);
        assert_eq!(tenant.spec.configuration.unwrap().name, "wandb-minio-config");
        assert!(tenant.spec.request_auto_cert);
        assert_eq!(tenant.spec.buckets[0].name, "wandb");
    }

    #[test]
    fn test_health_projection() {
        let project = |health: &str| {
            let condition = reported_ready(&tenant_with_health(health)).into_condition();
            let kind = RULES.kind_of(MINIO_REPORTED_READY).unwrap();
            (condition.status, kind.project(&condition))
        };
        assert_eq!(project("green"), (ConditionStatus::True, InfraState::Healthy));
        assert_eq!(project("yellow"), (ConditionStatus::False, InfraState::Degraded));
        assert_eq!(project("red"), (ConditionStatus::False, InfraState::Error));
        assert_eq!(project("purple"), (ConditionStatus::Unknown, InfraState::Unknown));
    }

    #[tokio::test]
    async fn test_password_is_stable_across_ticks() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        let reconciler = MinioReconciler::new(&gw, &parent, config(Size::Dev));

        let status = run_component(&reconciler, &InfraStatus::default(), 1, EXPIRY).await.status;
        assert!(gw.fetch::<Secret>("wandb", "wandb-minio-connection").is_none());
        let config_secret: Secret = gw.fetch("wandb", "wandb-minio-config").unwrap();
        let first = MinioEnvConfig::parse(&String::from_utf8(
            config_secret.data.unwrap()["config.env"].0.clone(),
        )
        .unwrap());
        assert_eq!(first.root_user, "admin");

        gw.set_status::<Tenant>("wandb", "wandb-minio", json!({ "healthStatus": "green" }));
        let mut status = status;
        for _ in 0..2 {
            let outcome = run_component(&reconciler, &status, 1, EXPIRY).await;
            let secret: Secret = gw.fetch("wandb", "wandb-minio-connection").unwrap();
            let info = ConnectionInfo::from_secret(&secret);
            assert_eq!(info.get(KEY_ROOT_PASSWORD), Some(first.root_password.as_str()));
            assert_eq!(
                info.url(),
                format!(
                    "minio://admin:{}@wandb-minio-hl.wandb.svc.cluster.local:443",
                    first.root_password
                )
            );
            status = outcome.status;
        }
        assert_eq!(status.state, InfraState::Healthy);
    }

    #[tokio::test]
    async fn test_config_secret_is_owned_by_parent() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        let reconciler = MinioReconciler::new(&gw, &parent, config(Size::Dev));

        let mut status = InfraStatus::default();
        for _ in 0..2 {
            status = run_component(&reconciler, &status, 1, EXPIRY).await.status;
            let config_secret: Secret = gw.fetch("wandb", "wandb-minio-config").unwrap();
            let owners = config_secret.metadata.owner_references.unwrap();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].uid, PARENT_UID);
            assert_eq!(owners[0].kind, "WeightsAndBiases");
        }
        assert!(gw.fetch::<Tenant>("wandb", "wandb-minio").is_some());
    }

    #[tokio::test]
    async fn test_red_tenant_is_error() {
        let gw = MemoryGateway::new();
        let parent = test_parent();
        gw.insert(&tenant_with_health("red"));
        let reconciler = MinioReconciler::new(&gw, &parent, config(Size::Dev));
        let outcome = run_component(&reconciler, &InfraStatus::default(), 1, EXPIRY).await;
        assert_eq!(outcome.status.state, InfraState::Error);
        assert_eq!(outcome.requeue_after(), Duration::from_secs(15));
        let reported = find_condition(&outcome.status.conditions, MINIO_REPORTED_READY).unwrap();
        assert_eq!(reported.reason, "red");
    }
}
