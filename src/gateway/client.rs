//! Gateway backed by the Kubernetes API server

use super::{ClusterObject, ObjectKey, ResourceGateway};
use crate::error::{is_not_found, OperatorError, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// [`ResourceGateway`] over a live [`kube::Client`].
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ClusterObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceGateway for KubeGateway {
    async fn get<K: ClusterObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        match self.api::<K>(&key.namespace).get(&key.name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(OperatorError::KubeApi(e.to_string())),
        }
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<()> {
        let key = ObjectKey::of(obj)?;
        match self
            .api::<K>(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(kind = %K::kind(&()), name = %key, "Resource already exists");
                Ok(())
            }
            Err(e) => Err(OperatorError::KubeApi(e.to_string())),
        }
    }

    async fn replace<K: ClusterObject>(&self, obj: &K) -> Result<()> {
        let key = ObjectKey::of(obj)?;
        self.api::<K>(&key.namespace)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|e| OperatorError::KubeApi(e.to_string()))?;
        Ok(())
    }

    async fn delete<K: ClusterObject>(&self, key: &ObjectKey) -> Result<()> {
        match self
            .api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(OperatorError::KubeApi(e.to_string())),
        }
    }

    async fn merge_patch<K: ClusterObject>(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<()> {
        self.api::<K>(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| OperatorError::KubeApi(e.to_string()))?;
        Ok(())
    }

    async fn patch_status<K: ClusterObject>(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<K>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| OperatorError::KubeApi(e.to_string()))?;
        Ok(())
    }
}
