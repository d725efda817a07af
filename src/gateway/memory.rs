//! In-memory gateway used by reconciler tests

use super::{ClusterObject, ObjectKey, ResourceGateway};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Replace,
    Delete,
    Patch,
    PatchStatus,
}

#[derive(Debug, Clone)]
pub struct Write {
    pub op: WriteOp,
    pub kind: String,
    pub key: ObjectKey,
    pub object: Value,
}

type StoreKey = (String, ObjectKey);

/// Stores objects as JSON keyed by kind and namespace/name.
#[derive(Default)]
pub struct MemoryGateway {
    objects: Mutex<BTreeMap<StoreKey, Value>>,
    writes: Mutex<Vec<Write>>,
    failing: Mutex<BTreeSet<String>>,
    version: Mutex<u64>,
}

fn kind_of<K: ClusterObject>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        let mut version = self.version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    fn check<K: ClusterObject>(&self) -> Result<()> {
        if self.failing.lock().unwrap().contains(&kind_of::<K>()) {
            return Err(OperatorError::KubeApi(format!(
                "injected failure for {}",
                K::kind(&())
            )));
        }
        Ok(())
    }

    fn record(&self, op: WriteOp, kind: String, key: ObjectKey, object: Value) {
        self.writes.lock().unwrap().push(Write {
            op,
            kind,
            key,
            object,
        });
    }

    /// Seed an object without recording a write.
    pub fn insert<K: ClusterObject>(&self, obj: &K) {
        let key = ObjectKey::of(obj).unwrap();
        let mut value = serde_json::to_value(obj).unwrap();
        value["metadata"]["resourceVersion"] = Value::String(self.next_version());
        self.objects
            .lock()
            .unwrap()
            .insert((kind_of::<K>(), key), value);
    }

    /// Remove an object without recording a write, as a vendor operator would.
    pub fn remove<K: ClusterObject>(&self, namespace: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(kind_of::<K>(), ObjectKey::new(namespace, name)));
    }

    pub fn fetch<K: ClusterObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind_of::<K>(), ObjectKey::new(namespace, name)))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Merge a status into a stored object without recording a write.
    pub fn set_status<K: ClusterObject>(&self, namespace: &str, name: &str, status: Value) {
        let mut objects = self.objects.lock().unwrap();
        let value = objects
            .get_mut(&(kind_of::<K>(), ObjectKey::new(namespace, name)))
            .unwrap();
        merge(value, &serde_json::json!({ "status": status }));
    }

    /// Make every call for kind `K` fail with an API error.
    pub fn fail_kind<K: ClusterObject>(&self) {
        self.failing.lock().unwrap().insert(kind_of::<K>());
    }

    pub fn heal_kind<K: ClusterObject>(&self) {
        self.failing.lock().unwrap().remove(&kind_of::<K>());
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_of<K: ClusterObject>(&self) -> Vec<Write> {
        let kind = kind_of::<K>();
        self.writes().into_iter().filter(|w| w.kind == kind).collect()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }
}

#[async_trait]
impl ResourceGateway for MemoryGateway {
    async fn get<K: ClusterObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.check::<K>()?;
        Ok(self.fetch(&key.namespace, &key.name))
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<()> {
        self.check::<K>()?;
        let key = ObjectKey::of(obj)?;
        let value = serde_json::to_value(obj)?;
        self.record(WriteOp::Create, kind_of::<K>(), key.clone(), value.clone());
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&(kind_of::<K>(), key.clone())) {
            let mut value = value;
            value["metadata"]["resourceVersion"] = Value::String(self.next_version());
            objects.insert((kind_of::<K>(), key), value);
        }
        Ok(())
    }

    async fn replace<K: ClusterObject>(&self, obj: &K) -> Result<()> {
        self.check::<K>()?;
        let key = ObjectKey::of(obj)?;
        let value = serde_json::to_value(obj)?;
        self.record(WriteOp::Replace, kind_of::<K>(), key.clone(), value.clone());
        let mut objects = self.objects.lock().unwrap();
        let store_key = (kind_of::<K>(), key.clone());
        let Some(existing) = objects.get(&store_key) else {
            return Err(OperatorError::KubeApi(format!("{} not found", key)));
        };
        // the status subresource survives a replace of the main resource
        let status = existing.get("status").cloned();
        let mut value = value;
        match status {
            Some(status) => value["status"] = status,
            None => {
                if let Value::Object(map) = &mut value {
                    map.remove("status");
                }
            }
        }
        value["metadata"]["resourceVersion"] = Value::String(self.next_version());
        objects.insert(store_key, value);
        Ok(())
    }

    async fn delete<K: ClusterObject>(&self, key: &ObjectKey) -> Result<()> {
        self.check::<K>()?;
        self.record(WriteOp::Delete, kind_of::<K>(), key.clone(), Value::Null);
        self.objects
            .lock()
            .unwrap()
            .remove(&(kind_of::<K>(), key.clone()));
        Ok(())
    }

    async fn merge_patch<K: ClusterObject>(&self, key: &ObjectKey, patch: Value) -> Result<()> {
        self.check::<K>()?;
        self.record(WriteOp::Patch, kind_of::<K>(), key.clone(), patch.clone());
        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.get_mut(&(kind_of::<K>(), key.clone())) else {
            return Err(OperatorError::KubeApi(format!("{} not found", key)));
        };
        merge(existing, &patch);
        Ok(())
    }

    async fn patch_status<K: ClusterObject>(&self, key: &ObjectKey, status: Value) -> Result<()> {
        self.check::<K>()?;
        let patch = serde_json::json!({ "status": status });
        self.record(WriteOp::PatchStatus, kind_of::<K>(), key.clone(), patch.clone());
        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.get_mut(&(kind_of::<K>(), key.clone())) else {
            return Err(OperatorError::KubeApi(format!("{} not found", key)));
        };
        merge(existing, &patch);
        Ok(())
    }
}
