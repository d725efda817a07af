//! Deterministic names for everything a component creates

use crate::gateway::ObjectKey;

/// Derives every name of one component from its namespace and spec name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameBuilder {
    namespace: String,
    spec_name: String,
}

impl NameBuilder {
    pub fn new(namespace: impl Into<String>, spec_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            spec_name: spec_name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the primary vendor resource.
    pub fn vendor_name(&self) -> &str {
        &self.spec_name
    }

    pub fn key(&self, name: impl Into<String>) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), name)
    }

    pub fn vendor_key(&self) -> ObjectKey {
        self.key(self.spec_name.clone())
    }

    /// Cluster-local DNS name of a service in this namespace.
    pub fn service_dns(&self, service: &str) -> String {
        format!("{}.{}.svc.cluster.local", service, self.namespace)
    }

    pub fn connection_name(&self) -> String {
        format!("{}-connection", self.spec_name)
    }

    pub fn backup_name(&self) -> String {
        format!("{}-backup", self.connection_name())
    }

    pub fn config_name(&self) -> String {
        format!("{}-config", self.spec_name)
    }

    pub fn node_pool_name(&self) -> String {
        format!("{}-node-pool", self.spec_name)
    }

    /// Data PVC of a node-pool broker: `data-<volume>-<cluster>-<pool>-<replica>`.
    pub fn pvc_name(&self, volume: u32, replica: u32) -> String {
        format!(
            "data-{}-{}-{}-{}",
            volume,
            self.spec_name,
            self.node_pool_name(),
            replica
        )
    }

    pub fn pool_name(&self) -> String {
        format!("{}-pool", self.spec_name)
    }

    pub fn headless_service_name(&self) -> String {
        format!("{}-hl", self.spec_name)
    }

    pub fn replication_name(&self) -> String {
        format!("{}-replica", self.spec_name)
    }

    pub fn sentinel_service_name(&self) -> String {
        format!("{}-sentinel", self.spec_name)
    }

    pub fn pxc_service_name(&self) -> String {
        format!("{}-pxc", self.spec_name)
    }

    pub fn proxysql_service_name(&self) -> String {
        format!("{}-proxysql", self.spec_name)
    }

    pub fn clickhouse_service_name(&self) -> String {
        format!("clickhouse-{}", self.spec_name)
    }
}
