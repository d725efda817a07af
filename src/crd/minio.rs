//! MinIO Tenant (minio.min.io/v2)

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "minio.min.io",
    version = "v2",
    kind = "Tenant",
    plural = "tenants",
    namespaced,
    status = "TenantStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    pub pools: Vec<TenantPool>,

    /// Secret holding the `config.env` blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<LocalReference>,

    #[serde(default)]
    pub request_auto_cert: bool,

    #[serde(default)]
    pub buckets: Vec<TenantBucket>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantPool {
    pub name: String,

    pub servers: i32,

    pub volumes_per_server: i32,

    pub volume_claim_template: PersistentVolumeClaim,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalReference {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantBucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// green, yellow or red
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
}

impl Tenant {
    pub fn health_status(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.health_status.as_deref())
    }
}
