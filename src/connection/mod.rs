//! Connection publisher
//!
//! Each component publishes a Secret carrying at least a `url` key. The
//! Secret is owned by the parent resource through a non-controlling owner
//! reference, so it is garbage collected with the parent without making
//! the parent a cascade root. Under the `Retain` policy the secret is
//! copied to an unowned backup before its vendor resource goes away.

pub mod kafka;
pub mod minio;

use crate::crd::{InfraConnection, RetentionPolicy, SecretKeyRef, WeightsAndBiases};
use crate::error::Result;
use crate::gateway::{crud_resource, get_resource, ResourceGateway};
use crate::names::NameBuilder;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use rand::Rng;
use std::collections::BTreeMap;
use std::iter;
use tracing::{debug, info};

pub const KEY_URL: &str = "url";
pub const KEY_HOST: &str = "Host";
pub const KEY_PORT: &str = "Port";
pub const KEY_CLUSTER_ID: &str = "ClusterID";
pub const KEY_ROOT_USER: &str = "rootUser";
pub const KEY_ROOT_PASSWORD: &str = "rootPassword";
pub const KEY_PASSWORD: &str = "password";

const SECRET_KIND: &str = "Secret";
const PASSWORD_LENGTH: usize = 20;

/// Owner reference pointing at `owner`.
///
/// Vendor resources are controlled by the parent; connection secrets carry
/// a non-controlling reference that does not block owner deletion.
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K, controller: bool) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: Some(controller),
        block_owner_deletion: Some(controller),
    }
}

/// A random alphabetic password.
pub fn generate_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    iter::repeat(())
        .map(|()| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .take(PASSWORD_LENGTH)
        .collect()
}

/// Labels stamped on everything this operator creates.
pub fn common_labels(component: &str, instance: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), component.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), instance.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "wandb-infra-operator".to_string(),
    );
    labels
}

/// The key/value payload of a connection secret.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    fields: BTreeMap<String, String>,
}

impl ConnectionInfo {
    pub fn new(url: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(KEY_URL.to_string(), url.into());
        Self { fields }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn url(&self) -> &str {
        self.get(KEY_URL).unwrap_or_default()
    }

    /// Whether every required key carries a value.
    pub fn is_complete(&self, required: &[&str]) -> bool {
        !self.url().is_empty()
            && required
                .iter()
                .all(|key| self.get(key).is_some_and(|v| !v.is_empty()))
    }

    pub fn from_secret(secret: &Secret) -> Self {
        let mut fields = BTreeMap::new();
        if let Some(data) = &secret.data {
            for (key, value) in data {
                fields.insert(key.clone(), String::from_utf8_lossy(&value.0).into_owned());
            }
        }
        if let Some(string_data) = &secret.string_data {
            for (key, value) in string_data {
                fields.insert(key.clone(), value.clone());
            }
        }
        Self { fields }
    }

    fn to_data(&self) -> BTreeMap<String, ByteString> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
            .collect()
    }
}

/// Build a connection-shaped secret. No owner leaves it unowned.
pub fn build_secret(
    names: &NameBuilder,
    name: String,
    component: &str,
    info: &ConnectionInfo,
    owner: Option<OwnerReference>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(names.namespace().to_string()),
            labels: Some(common_labels(component, names.vendor_name())),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(info.to_data()),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Read a component's live connection secret.
pub async fn read_connection<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
) -> Result<Option<ConnectionInfo>> {
    let secret: Option<Secret> =
        get_resource(gateway, &names.key(names.connection_name()), SECRET_KIND).await?;
    Ok(secret.as_ref().map(ConnectionInfo::from_secret))
}

/// Write the connection secret and return the status reference to its URL.
pub async fn publish_connection<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    component: &str,
    parent: &WeightsAndBiases,
    info: &ConnectionInfo,
) -> Result<InfraConnection> {
    let name = names.connection_name();
    let actual: Option<Secret> = get_resource(gateway, &names.key(name.clone()), SECRET_KIND).await?;
    let desired = build_secret(
        names,
        name.clone(),
        component,
        info,
        Some(owner_reference(parent, false)),
    );
    let action = crud_resource(gateway, Some(&desired), actual.as_ref()).await?;
    debug!(component, name = %name, action = %action, "Published connection secret");
    Ok(InfraConnection {
        url: SecretKeyRef {
            name,
            key: KEY_URL.to_string(),
        },
    })
}

/// Copy the connection secret to its backup name, replacing any previous backup.
///
/// Returns whether a backup was written.
pub async fn backup_connection<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    component: &str,
) -> Result<bool> {
    let Some(info) = read_connection(gateway, names).await? else {
        debug!(component, "No connection secret to back up");
        return Ok(false);
    };

    let backup_key = names.key(names.backup_name());
    let old: Option<Secret> = get_resource(gateway, &backup_key, SECRET_KIND).await?;
    if old.is_some() {
        gateway.delete::<Secret>(&backup_key).await?;
    }

    let backup = build_secret(names, names.backup_name(), component, &info, None);
    gateway.create(&backup).await?;
    info!(component, backup = %backup_key, "Backed up connection secret");
    Ok(true)
}

/// Apply a retention policy to a component's connection secret.
pub async fn apply_retention<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    component: &str,
    policy: RetentionPolicy,
) -> Result<()> {
    match policy {
        RetentionPolicy::NoPolicy => Ok(()),
        RetentionPolicy::Purge => {
            info!(component, name = %names.connection_name(), "Purging connection secret");
            gateway
                .delete::<Secret>(&names.key(names.connection_name()))
                .await
        }
        RetentionPolicy::Retain => backup_connection(gateway, names, component)
            .await
            .map(|_| ()),
    }
}

/// Drop the parent's owner reference so the connection secret outlives it.
pub async fn release_connection<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    parent: &WeightsAndBiases,
) -> Result<()> {
    let key = names.key(names.connection_name());
    let Some(mut secret) = get_resource::<G, Secret>(gateway, &key, SECRET_KIND).await? else {
        return Ok(());
    };
    let uid = parent.metadata.uid.clone().unwrap_or_default();
    let before = secret.owner_references().len();
    secret
        .owner_references_mut()
        .retain(|o| o.uid != uid);
    if secret.owner_references().len() != before {
        info!(name = %key, "Released connection secret from parent");
        gateway.replace(&secret).await?;
    }
    Ok(())
}

/// Read a generated credential from the component's `<name>-config` secret,
/// creating it with a fresh password on first use.
pub async fn ensure_password<G: ResourceGateway>(
    gateway: &G,
    names: &NameBuilder,
    component: &str,
    owner: OwnerReference,
) -> Result<String> {
    let key = names.key(names.config_name());
    let actual: Option<Secret> = get_resource(gateway, &key, SECRET_KIND).await?;
    if let Some(password) = actual
        .as_ref()
        .map(ConnectionInfo::from_secret)
        .and_then(|info| info.get(KEY_PASSWORD).map(str::to_string))
        .filter(|p| !p.is_empty())
    {
        return Ok(password);
    }

    let password = generate_password();
    let info = ConnectionInfo::default().with(KEY_PASSWORD, password.clone());
    let desired = build_secret(names, names.config_name(), component, &info, Some(owner));
    crud_resource(gateway, Some(&desired), actual.as_ref()).await?;
    info!(component, name = %key, "Generated credentials");
    Ok(password)
}
