//! MinIO root credentials
//!
//! The Tenant reads its root credentials from a `config.env` blob of shell
//! export lines. The password is generated once and then read back from
//! the live secret on every later tick, never regenerated.

use super::{common_labels, generate_password, ConnectionInfo, KEY_ROOT_PASSWORD, KEY_ROOT_USER};
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, ResourceGateway};
use crate::names::NameBuilder;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

pub const CONFIG_FILE_KEY: &str = "config.env";
pub const MINIO_PORT: u16 = 443;
const DEFAULT_BROWSER_SETTING: &str = "on";

static ROOT_USER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"export MINIO_ROOT_USER="([^"]*)""#).unwrap());
static ROOT_PASSWORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"export MINIO_ROOT_PASSWORD="([^"]*)""#).unwrap());
static BROWSER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"export MINIO_BROWSER="([^"]*)""#).unwrap());

/// Contents of the `config.env` blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MinioEnvConfig {
    pub root_user: String,
    pub root_password: String,
    pub browser: String,
}

fn capture(regex: &Regex, contents: &str) -> String {
    regex
        .captures(contents)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

impl MinioEnvConfig {
    /// Parse export lines; unmatched fields stay empty.
    pub fn parse(contents: &str) -> Self {
        Self {
            root_user: capture(&ROOT_USER_REGEX, contents),
            root_password: capture(&ROOT_PASSWORD_REGEX, contents),
            browser: capture(&BROWSER_REGEX, contents),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "export MINIO_ROOT_USER=\"{}\"\nexport MINIO_ROOT_PASSWORD=\"{}\"\nexport MINIO_BROWSER=\"{}\"\n",
            self.root_user, self.root_password, self.browser
        )
    }
}

fn config_blob(secret: &Secret) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(CONFIG_FILE_KEY)) {
        return Some(String::from_utf8_lossy(&value.0).into_owned());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(CONFIG_FILE_KEY))
        .cloned()
}

/// Write the `<name>-config` secret and return the credentials it holds.
///
/// An existing parseable password is kept verbatim; otherwise a new one is
/// generated.
pub async fn write_minio_config<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    owner: OwnerReference,
    root_user: &str,
) -> Result<MinioEnvConfig> {
    let key = names.key(names.config_name());
    let actual: Option<Secret> = get_resource(gateway, &key, "MinioConfig").await?;

    let existing = actual
        .as_ref()
        .and_then(config_blob)
        .map(|blob| MinioEnvConfig::parse(&blob))
        .unwrap_or_default();

    let root_password = if existing.root_password.is_empty() {
        debug!(name = %key, "Generating MinIO root password");
        generate_password()
    } else {
        existing.root_password
    };
    let browser = if existing.browser.is_empty() {
        DEFAULT_BROWSER_SETTING.to_string()
    } else {
        existing.browser
    };
    let config = MinioEnvConfig {
        root_user: root_user.to_string(),
        root_password,
        browser,
    };

    let desired = Secret {
        metadata: ObjectMeta {
            name: Some(names.config_name()),
            namespace: Some(names.namespace().to_string()),
            labels: Some(common_labels("minio", names.vendor_name())),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_FILE_KEY.to_string(),
            ByteString(config.render().into_bytes()),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };
    crud_resource(gateway, Some(&desired), actual.as_ref()).await?;
    Ok(config)
}

/// `minio://<user>:<password>@<name>-hl.<ns>.svc.cluster.local:443`
pub fn minio_connection(names: &NameBuilder, config: &MinioEnvConfig) -> ConnectionInfo {
    let host = names.service_dns(&names.headless_service_name());
    ConnectionInfo::new(format!(
        "minio://{}:{}@{}:{}",
        config.root_user, config.root_password, host, MINIO_PORT
    ))
    .with(KEY_ROOT_USER, config.root_user.clone())
    .with(KEY_ROOT_PASSWORD, config.root_password.clone())
}
