//! Kafka connection details and cluster identity
//!
//! Strimzi generates a fresh cluster id for every new Kafka resource. A
//! cluster recreated over retained volumes has to adopt the id those
//! volumes were formatted with, so the id travels in the connection secret
//! and its backup.

use super::{build_secret, ConnectionInfo, KEY_CLUSTER_ID, KEY_HOST, KEY_PORT};
use crate::crd::kafka::Kafka;
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, ResourceGateway};
use crate::names::NameBuilder;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::json;
use tracing::{info, warn};

pub const PLAIN_PORT: u16 = 9092;
pub const TLS_PORT: u16 = 9093;

/// Pick the cluster id to publish from the secret's and the resource's view.
///
/// | secret | resource | result |
/// |---|---|---|
/// | empty | empty | empty |
/// | empty | set | resource |
/// | set | empty | secret |
/// | set | set | resource |
pub fn resolve_cluster_id(secret_id: &str, cr_id: &str) -> String {
    match (secret_id.is_empty(), cr_id.is_empty()) {
        (true, _) => cr_id.to_string(),
        (false, true) => secret_id.to_string(),
        (false, false) => {
            if secret_id != cr_id {
                warn!(
                    secret = secret_id,
                    resource = cr_id,
                    "Kafka cluster id changed, publishing the resource's id"
                );
            }
            cr_id.to_string()
        }
    }
}

/// `kafka://<name>.<ns>.svc.cluster.local:9092` plus host, port and cluster id.
pub fn kafka_connection(names: &NameBuilder, cluster_id: &str) -> ConnectionInfo {
    let host = names.service_dns(names.vendor_name());
    ConnectionInfo::new(format!("kafka://{}:{}", host, PLAIN_PORT))
        .with(KEY_HOST, host)
        .with(KEY_PORT, PLAIN_PORT.to_string())
        .with(KEY_CLUSTER_ID, cluster_id)
}

/// Stamp a retained cluster id onto a freshly created Kafka resource.
///
/// Runs only while the resource has no id of its own. A backup secret, if
/// present, is first restored as the live connection secret. The id is
/// adopted only when the first broker's data volume still exists; the
/// backup is consumed once adopted. Returns the adopted id.
pub async fn restore_cluster_id<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    kafka: &Kafka,
    owner: OwnerReference,
) -> Result<Option<String>> {
    if kafka.cluster_id().is_some() {
        return Ok(None);
    }

    let backup_key = names.key(names.backup_name());
    let backup: Option<Secret> = get_resource(gateway, &backup_key, "KafkaBackup").await?;
    if let Some(backup) = &backup {
        let restored = build_secret(
            names,
            names.connection_name(),
            "kafka",
            &ConnectionInfo::from_secret(backup),
            Some(owner),
        );
        let actual: Option<Secret> =
            get_resource(gateway, &names.key(names.connection_name()), "Secret").await?;
        crud_resource(gateway, Some(&restored), actual.as_ref()).await?;
        info!(backup = %backup_key, "Restored Kafka connection secret from backup");
    }

    let cluster_id = super::read_connection(gateway, names)
        .await?
        .and_then(|info| info.get(KEY_CLUSTER_ID).map(str::to_string))
        .unwrap_or_default();
    if cluster_id.is_empty() {
        info!(name = %names.vendor_key(), "No retained Kafka cluster id");
        return Ok(None);
    }

    let pvc_key = names.key(names.pvc_name(0, 0));
    let pvc: Option<PersistentVolumeClaim> = get_resource(gateway, &pvc_key, "PersistentVolumeClaim").await?;
    if pvc.is_none() {
        info!(pvc = %pvc_key, "No retained Kafka volume, leaving cluster id to Strimzi");
        return Ok(None);
    }

    gateway
        .patch_status::<Kafka>(&names.vendor_key(), json!({ "clusterId": cluster_id }))
        .await?;
    if backup.is_some() {
        gateway.delete::<Secret>(&backup_key).await?;
    }
    info!(name = %names.vendor_key(), cluster_id = %cluster_id, "Adopted retained Kafka cluster id");
    Ok(Some(cluster_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::owner_reference;
    use crate::crd::kafka::KafkaSpec;
    use crate::gateway::memory::{MemoryGateway, WriteOp};
    use crate::testing::test_parent;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn names() -> NameBuilder {
        NameBuilder::new("wandb", "wandb-kafka")
    }

    fn kafka() -> Kafka {
        let mut kafka = Kafka::new("wandb-kafka", KafkaSpec::default());
        kafka.metadata.namespace = Some("wandb".to_string());
        kafka
    }

    fn pvc(name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("wandb".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn backup(cluster_id: &str) -> Secret {
        build_secret(
            &names(),
            names().backup_name(),
            "kafka",
            &kafka_connection(&names(), cluster_id),
            None,
        )
    }

    #[test]
    fn test_cluster_id_adoption_table() {
        assert_eq!(resolve_cluster_id("", ""), "");
        assert_eq!(resolve_cluster_id("", "cr"), "cr");
        assert_eq!(resolve_cluster_id("secret", ""), "secret");
        assert_eq!(resolve_cluster_id("secret", "cr"), "cr");
        assert_eq!(resolve_cluster_id("same", "same"), "same");
    }

    #[test]
    fn test_connection_fields() {
        let info = kafka_connection(&names(), "abc");
        assert_eq!(info.url(), "kafka://wandb-kafka.wandb.svc.cluster.local:9092");
        assert_eq!(info.get(KEY_HOST), Some("wandb-kafka.wandb.svc.cluster.local"));
        assert_eq!(info.get(KEY_PORT), Some("9092"));
        assert_eq!(info.get(KEY_CLUSTER_ID), Some("abc"));
    }

    #[tokio::test]
    async fn test_restore_from_backup_with_volume() {
        let gw = MemoryGateway::new();
        gw.insert(&kafka());
        gw.insert(&backup("retained-id"));
        gw.insert(&pvc("data-0-wandb-kafka-wandb-kafka-node-pool-0"));

        let owner = owner_reference(&test_parent(), false);
        let adopted = restore_cluster_id(&gw, &names(), &kafka(), owner).await.unwrap();
        assert_eq!(adopted.as_deref(), Some("retained-id"));

        let stored: Kafka = gw.fetch("wandb", "wandb-kafka").unwrap();
        assert_eq!(stored.cluster_id(), Some("retained-id"));
        let connection: Secret = gw.fetch("wandb", "wandb-kafka-connection").unwrap();
        assert_eq!(
            ConnectionInfo::from_secret(&connection).get(KEY_CLUSTER_ID),
            Some("retained-id")
        );
        assert!(gw.fetch::<Secret>("wandb", "wandb-kafka-connection-backup").is_none());
        assert_eq!(gw.writes_of::<Kafka>()[0].op, WriteOp::PatchStatus);
    }

    #[tokio::test]
    async fn test_restore_without_volume_keeps_backup() {
        let gw = MemoryGateway::new();
        gw.insert(&kafka());
        gw.insert(&backup("retained-id"));

        let owner = owner_reference(&test_parent(), false);
        let adopted = restore_cluster_id(&gw, &names(), &kafka(), owner).await.unwrap();
        assert!(adopted.is_none());
        assert!(gw.writes_of::<Kafka>().is_empty());
        assert!(gw.fetch::<Secret>("wandb", "wandb-kafka-connection-backup").is_some());
    }

    #[tokio::test]
    async fn test_missing_backup_is_not_an_error() {
        let gw = MemoryGateway::new();
        gw.insert(&kafka());
        let owner = owner_reference(&test_parent(), false);
        let adopted = restore_cluster_id(&gw, &names(), &kafka(), owner).await.unwrap();
        assert!(adopted.is_none());
        assert!(gw.writes().is_empty());
    }

    #[tokio::test]
    async fn test_no_restore_when_id_present() {
        let gw = MemoryGateway::new();
        let mut live = kafka();
        live.status = Some(crate::crd::kafka::KafkaStatus {
            cluster_id: Some("fresh".to_string()),
            ..Default::default()
        });
        gw.insert(&backup("retained-id"));
        let owner = owner_reference(&test_parent(), false);
        let adopted = restore_cluster_id(&gw, &names(), &live, owner).await.unwrap();
        assert!(adopted.is_none());
        assert!(gw.writes().is_empty());
    }
}
