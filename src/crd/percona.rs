//! Percona XtraDB Cluster (pxc.percona.com/v1)

use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "pxc.percona.com",
    version = "v1",
    kind = "PerconaXtraDBCluster",
    plural = "perconaxtradbclusters",
    namespaced,
    status = "PxcStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PxcSpec {
    pub cr_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsafe_flags: Option<UnsafeFlags>,

    pub pxc: PxcNodeSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haproxy: Option<ProxySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxysql: Option<ProxySpec>,
}

/// Allows single-node clusters and clusters without a proxy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnsafeFlags {
    #[serde(default)]
    pub pxc_size: bool,

    #[serde(default)]
    pub proxy_size: bool,

    #[serde(default)]
    pub proxy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PxcNodeSpec {
    pub size: i32,

    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    pub volume_spec: VolumeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    pub enabled: bool,

    #[serde(default)]
    pub size: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_spec: Option<VolumeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub persistent_volume_claim: PersistentVolumeClaimSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PxcStatus {
    /// ready, init, paused, stopping or error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Vec<String>>,
}

impl PerconaXtraDBCluster {
    pub fn app_state(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.state.as_deref())
    }

    pub fn proxysql_enabled(&self) -> bool {
        self.spec.proxysql.as_ref().is_some_and(|p| p.enabled)
    }
}
