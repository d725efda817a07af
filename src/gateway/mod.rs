//! Typed resource gateway
//!
//! A uniform facade over the cluster API: fetch any namespaced object by
//! key and drive a `desired` object against the `actual` one through
//! create, update, delete or nothing. Not-found never escapes a `get`; it
//! comes back as `None`.

mod client;
#[cfg(test)]
pub mod memory;

pub use client::KubeGateway;

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info};

/// Anything the gateway can move in and out of the cluster.
pub trait ClusterObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Namespace and name of a cluster object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object; fails when it carries no namespace.
    pub fn of<K: ClusterObject>(obj: &K) -> Result<Self> {
        let namespace = obj.namespace().ok_or_else(|| {
            OperatorError::InvalidState(format!(
                "{} {} has no namespace",
                K::kind(&()),
                obj.name_any()
            ))
        })?;
        Ok(Self::new(namespace, obj.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Action taken by [`crud_resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrudAction {
    #[default]
    None,
    Create,
    Update,
    Delete,
}

impl fmt::Display for CrudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrudAction::None => write!(f, "None"),
            CrudAction::Create => write!(f, "Create"),
            CrudAction::Update => write!(f, "Update"),
            CrudAction::Delete => write!(f, "Delete"),
        }
    }
}

/// Raw cluster access. Implementations never retry.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// Fetch an object; `Ok(None)` when the API reports not-found.
    async fn get<K: ClusterObject>(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Create an object. An already-existing object is not an error.
    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<()>;

    /// Unconditional full-object replace.
    async fn replace<K: ClusterObject>(&self, obj: &K) -> Result<()>;

    /// Delete an object. A missing object is not an error.
    async fn delete<K: ClusterObject>(&self, key: &ObjectKey) -> Result<()>;

    /// JSON merge patch against the main resource.
    async fn merge_patch<K: ClusterObject>(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<()>;

    /// JSON merge patch `{"status": status}` against the status subresource.
    async fn patch_status<K: ClusterObject>(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<()>;
}

/// Fetch an object, logging failures under `kind_label`.
pub async fn get_resource<G, K>(gateway: &G, key: &ObjectKey, kind_label: &str) -> Result<Option<K>>
where
    G: ResourceGateway,
    K: ClusterObject,
{
    match gateway.get::<K>(key).await {
        Ok(Some(obj)) => Ok(Some(obj)),
        Ok(None) => {
            debug!(kind = kind_label, name = %key, "Resource not found");
            Ok(None)
        }
        Err(e) => {
            error!(kind = kind_label, name = %key, error = %e, "Failed to get resource");
            Err(e)
        }
    }
}

fn exists<K: ClusterObject>(obj: Option<&K>) -> Option<&K> {
    obj.filter(|o| o.meta().name.as_deref().is_some_and(|n| !n.is_empty()))
}

/// Drive `actual` towards `desired` and report what was done.
///
/// | desired | actual | action |
/// |---|---|---|
/// | yes | no  | Create |
/// | yes | yes | Update |
/// | no  | yes | Delete |
/// | no  | no  | None   |
///
/// Update copies the live `resourceVersion` onto the desired object and
/// replaces it wholesale.
pub async fn crud_resource<G, K>(
    gateway: &G,
    desired: Option<&K>,
    actual: Option<&K>,
) -> Result<CrudAction>
where
    G: ResourceGateway,
    K: ClusterObject,
{
    let kind = K::kind(&());
    match (exists(desired), exists(actual)) {
        (Some(desired), None) => {
            info!(kind = %kind, name = %desired.name_any(), "Creating resource");
            gateway.create(desired).await?;
            Ok(CrudAction::Create)
        }
        (Some(desired), Some(actual)) => {
            let mut updated = desired.clone();
            updated.meta_mut().resource_version = actual.meta().resource_version.clone();
            debug!(kind = %kind, name = %updated.name_any(), "Updating resource");
            gateway.replace(&updated).await?;
            Ok(CrudAction::Update)
        }
        (None, Some(actual)) => {
            info!(kind = %kind, name = %actual.name_any(), "Deleting resource");
            gateway.delete::<K>(&ObjectKey::of(actual)?).await?;
            Ok(CrudAction::Delete)
        }
        (None, None) => Ok(CrudAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryGateway, WriteOp};
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("wandb".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_crud_table() {
        let gw = MemoryGateway::new();
        let desired = config_map("cm", "v1");

        let action = crud_resource::<_, ConfigMap>(&gw, None, None).await.unwrap();
        assert_eq!(action, CrudAction::None);

        let action = crud_resource(&gw, Some(&desired), None).await.unwrap();
        assert_eq!(action, CrudAction::Create);

        let actual: ConfigMap = gw.fetch("wandb", "cm").unwrap();
        let desired = config_map("cm", "v2");
        let action = crud_resource(&gw, Some(&desired), Some(&actual)).await.unwrap();
        assert_eq!(action, CrudAction::Update);
        let stored: ConfigMap = gw.fetch("wandb", "cm").unwrap();
        assert_eq!(stored.data.as_ref().unwrap()["k"], "v2");

        let action = crud_resource(&gw, None, Some(&stored)).await.unwrap();
        assert_eq!(action, CrudAction::Delete);
        assert!(gw.fetch::<ConfigMap>("wandb", "cm").is_none());

        let ops: Vec<WriteOp> = gw.writes().into_iter().map(|w| w.op).collect();
        assert_eq!(ops, vec![WriteOp::Create, WriteOp::Replace, WriteOp::Delete]);
    }

    #[tokio::test]
    async fn test_unnamed_objects_do_not_exist() {
        let gw = MemoryGateway::new();
        let nameless = ConfigMap::default();
        let action = crud_resource(&gw, Some(&nameless), Some(&nameless)).await.unwrap();
        assert_eq!(action, CrudAction::None);
        assert!(gw.writes().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let gw = MemoryGateway::new();
        let found: Option<ConfigMap> = get_resource(&gw, &ObjectKey::new("wandb", "missing"), "ConfigMap")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_api_errors_propagate() {
        let gw = MemoryGateway::new();
        gw.fail_kind::<ConfigMap>();
        let err = get_resource::<_, ConfigMap>(&gw, &ObjectKey::new("wandb", "cm"), "ConfigMap")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ApiError");

        let err = crud_resource(&gw, Some(&config_map("cm", "v")), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ApiError");
    }

    #[tokio::test]
    async fn test_update_carries_resource_version() {
        let gw = MemoryGateway::new();
        gw.insert(&config_map("cm", "v1"));
        let actual: ConfigMap = gw.fetch("wandb", "cm").unwrap();
        assert!(actual.metadata.resource_version.is_some());

        crud_resource(&gw, Some(&config_map("cm", "v2")), Some(&actual))
            .await
            .unwrap();
        let write = gw.writes().pop().unwrap();
        assert_eq!(
            write.object["metadata"]["resourceVersion"],
            serde_json::json!(actual.metadata.resource_version.unwrap())
        );
    }
}
