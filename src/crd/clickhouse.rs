//! Altinity ClickHouseInstallation (clickhouse.altinity.com/v1)

use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "clickhouse.altinity.com",
    version = "v1",
    kind = "ClickHouseInstallation",
    plural = "clickhouseinstallations",
    shortname = "chi",
    namespaced,
    status = "ChiStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ChiSpec {
    pub configuration: ChiConfiguration,

    #[serde(default)]
    pub defaults: ChiDefaults,

    #[serde(default)]
    pub templates: ChiTemplates,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiConfiguration {
    /// Flat user settings, e.g. `wandb/password_sha256_hex`
    #[serde(default)]
    pub users: BTreeMap<String, String>,

    #[serde(default)]
    pub clusters: Vec<ChiCluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiCluster {
    pub name: String,
    pub layout: ChiLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiLayout {
    pub shards_count: i32,
    pub replicas_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiDefaults {
    #[serde(default)]
    pub templates: ChiDefaultTemplates,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiDefaultTemplates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume_claim_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiTemplates {
    #[serde(default)]
    pub volume_claim_templates: Vec<ChiVolumeClaimTemplate>,

    #[serde(default)]
    pub pod_templates: Vec<ChiPodTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiVolumeClaimTemplate {
    pub name: String,
    pub spec: PersistentVolumeClaimSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChiPodTemplate {
    pub name: String,
    pub spec: k8s_openapi::api::core::v1::PodSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChiStatus {
    /// Names of the pods the installation manages
    #[serde(default)]
    pub pods: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ClickHouseInstallation {
    pub fn pod_names(&self) -> &[String] {
        self.status.as_ref().map(|s| s.pods.as_slice()).unwrap_or_default()
    }
}
