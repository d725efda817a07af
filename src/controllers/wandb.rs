//! WeightsAndBiases Controller
//!
//! Reconciles the parent resource: resolves every component's settings,
//! runs the five component reconcilers, folds their statuses into the
//! parent status and requeues after the shortest component delay.

use super::error_policy_backoff;
use super::infra::clickhouse::ClickHouseReconciler;
use super::infra::kafka::KafkaReconciler;
use super::infra::minio::MinioReconciler;
use super::infra::mysql::MySqlReconciler;
use super::infra::redis::RedisReconciler;
use super::infra::{run_component, ComponentOutcome};
use crate::conditions::{
    compute_condition_updates, ConditionStatus, InfraCondition, CONDITION_RECONCILED,
    REASON_FAILED_TO_CREATE, WANDB_FINALIZER,
};
use crate::config::OperatorConfig;
use crate::connection::{apply_retention, release_connection};
use crate::crd::{InfraStatus, RetentionPolicy, WandbStatus, WeightsAndBiases};
use crate::error::{OperatorError, Result};
use crate::gateway::{KubeGateway, ObjectKey, ResourceGateway};
use crate::presets::{
    resolve_clickhouse, resolve_kafka, resolve_minio, resolve_mysql, resolve_redis,
    ClickHouseConfig, KafkaConfig, MinioConfig, MySqlConfig, RedisConfig, ResolvedComponent,
};
use crate::state::{aggregate, InfraState};
use chrono::Utc;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Context for the WeightsAndBiases controller
pub struct WandbController {
    client: Client,
    config: OperatorConfig,
}

impl WandbController {
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self { client, config }
    }

    /// Run the controller until a shutdown signal arrives
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let parents: Api<WeightsAndBiases> = if self.config.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.config.namespace)
        };

        info!("Starting WeightsAndBiases controller");

        Controller::new(parents, Config::default())
            .shutdown_on_signal()
            .run(
                |parent, ctx| async move { ctx.reconcile(parent).await },
                |parent, error, _ctx| {
                    let backoff = error_policy_backoff(error);
                    error!(
                        name = %parent.name_any(),
                        code = error.code(),
                        error = %error,
                        backoff_secs = backoff.as_secs(),
                        "Reconciliation error"
                    );
                    Action::requeue(backoff)
                },
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        info!("Reconciled WeightsAndBiases: {}", obj.name);
                    }
                    Err(e) => {
                        error!("Reconciliation failed: {:?}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    async fn reconcile(&self, parent: Arc<WeightsAndBiases>) -> Result<Action> {
        let gateway = KubeGateway::new(self.client.clone());
        reconcile_parent(&gateway, &parent, &self.config).await
    }
}

struct Components {
    mysql: MySqlConfig,
    redis: RedisConfig,
    kafka: KafkaConfig,
    minio: MinioConfig,
    clickhouse: ClickHouseConfig,
}

/// Resolve every component up front; the error names the failing component.
fn resolve_components(
    parent: &WeightsAndBiases,
    namespace: &str,
    settings: &OperatorConfig,
) -> std::result::Result<Components, (&'static str, OperatorError)> {
    let spec = &parent.spec;
    let size = spec.size;
    let tag = |component: &'static str| move |e: OperatorError| (component, e);
    Ok(Components {
        mysql: resolve_mysql(size, &spec.mysql, namespace, settings).map_err(tag("mysql"))?,
        redis: resolve_redis(size, &spec.redis, namespace, settings).map_err(tag("redis"))?,
        kafka: resolve_kafka(size, &spec.kafka, namespace).map_err(tag("kafka"))?,
        minio: resolve_minio(size, &spec.minio, namespace, settings).map_err(tag("minio"))?,
        clickhouse: resolve_clickhouse(size, &spec.clickhouse, namespace, settings)
            .map_err(tag("clickhouse"))?,
    })
}

fn component_status_mut<'s>(status: &'s mut WandbStatus, component: &str) -> Option<&'s mut InfraStatus> {
    match component {
        "mysql" => Some(&mut status.mysql_status),
        "redis" => Some(&mut status.redis_status),
        "kafka" => Some(&mut status.kafka_status),
        "minio" => Some(&mut status.minio_status),
        "clickhouse" => Some(&mut status.clickhouse_status),
        _ => None,
    }
}

fn config_failure(
    previous: &InfraStatus,
    error: &OperatorError,
    generation: i64,
    expiry: Duration,
) -> InfraStatus {
    let current = vec![InfraCondition::new(
        CONDITION_RECONCILED,
        ConditionStatus::False,
        REASON_FAILED_TO_CREATE,
        error.to_string(),
    )];
    InfraStatus {
        ready: false,
        state: InfraState::Error,
        connection: previous.connection.clone(),
        conditions: compute_condition_updates(&previous.conditions, &current, generation, expiry),
        last_reconciled: Some(Utc::now()),
    }
}

async fn persist_status<G: ResourceGateway>(
    gateway: &G,
    key: &ObjectKey,
    status: &WandbStatus,
) -> Result<()> {
    gateway
        .patch_status::<WeightsAndBiases>(key, serde_json::to_value(status)?)
        .await
}

async fn ensure_finalizer<G: ResourceGateway>(
    gateway: &G,
    parent: &WeightsAndBiases,
    key: &ObjectKey,
) -> Result<()> {
    let mut finalizers = parent.finalizers().to_vec();
    if finalizers.iter().any(|f| f == WANDB_FINALIZER) {
        return Ok(());
    }
    finalizers.push(WANDB_FINALIZER.to_string());
    info!(name = %key, "Adding finalizer");
    gateway
        .merge_patch::<WeightsAndBiases>(key, json!({ "metadata": { "finalizers": finalizers } }))
        .await
}

/// Settings of every component whose spec still resolves.
fn retention_targets(
    parent: &WeightsAndBiases,
    namespace: &str,
    settings: &OperatorConfig,
) -> Vec<(&'static str, ResolvedComponent)> {
    let spec = &parent.spec;
    let size = spec.size;
    let resolved = [
        ("mysql", resolve_mysql(size, &spec.mysql, namespace, settings).map(|c| c.common)),
        ("redis", resolve_redis(size, &spec.redis, namespace, settings).map(|c| c.common)),
        ("kafka", resolve_kafka(size, &spec.kafka, namespace).map(|c| c.common)),
        ("minio", resolve_minio(size, &spec.minio, namespace, settings).map(|c| c.common)),
        (
            "clickhouse",
            resolve_clickhouse(size, &spec.clickhouse, namespace, settings).map(|c| c.common),
        ),
    ];
    resolved
        .into_iter()
        .filter_map(|(component, result)| match result {
            Ok(common) => Some((component, common)),
            Err(e) => {
                warn!(component, code = e.code(), error = %e, "Skipping retention for unresolvable component");
                None
            }
        })
        .collect()
}

/// Apply each enabled component's retention policy, then let the parent go.
async fn handle_deletion<G: ResourceGateway>(
    gateway: &G,
    parent: &WeightsAndBiases,
    key: &ObjectKey,
    settings: &OperatorConfig,
) -> Result<Action> {
    if !parent.finalizers().iter().any(|f| f == WANDB_FINALIZER) {
        return Ok(Action::await_change());
    }
    info!(name = %key, "Handling deletion of WeightsAndBiases");

    for (component, common) in retention_targets(parent, &key.namespace, settings) {
        if !common.enabled {
            continue;
        }
        apply_retention(gateway, &common.names, component, common.retention).await?;
        if common.retention == RetentionPolicy::Retain {
            release_connection(gateway, &common.names, parent).await?;
        }
    }

    let finalizers: Vec<String> = parent
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != WANDB_FINALIZER)
        .cloned()
        .collect();
    gateway
        .merge_patch::<WeightsAndBiases>(key, json!({ "metadata": { "finalizers": finalizers } }))
        .await?;

    info!(name = %key, "Finalizer removed");
    Ok(Action::await_change())
}

/// One tick for one parent resource.
///
/// Every component runs even when an earlier one failed; the status is
/// persisted before the first component error is returned.
pub async fn reconcile_parent<G: ResourceGateway>(
    gateway: &G,
    parent: &WeightsAndBiases,
    settings: &OperatorConfig,
) -> Result<Action> {
    let key = ObjectKey::of(parent)?;
    info!(name = %key, "Reconciling WeightsAndBiases");

    if parent.metadata.deletion_timestamp.is_some() {
        return handle_deletion(gateway, parent, &key, settings).await;
    }

    let generation = parent.metadata.generation.unwrap_or_default();
    let expiry = settings.condition_expiry;
    let previous = parent.status.clone().unwrap_or_default();

    let components = match resolve_components(parent, &key.namespace, settings) {
        Ok(components) => components,
        Err((component, e)) => {
            warn!(component, code = e.code(), error = %e, "Invalid component settings");
            let mut status = previous.clone();
            if let Some(slot) = component_status_mut(&mut status, component) {
                *slot = config_failure(slot, &e, generation, expiry);
            }
            status.ready = false;
            status.state = InfraState::Error;
            status.observed_generation = generation;
            persist_status(gateway, &key, &status).await?;
            return Err(e);
        }
    };

    ensure_finalizer(gateway, parent, &key).await?;

    let mysql = MySqlReconciler::new(gateway, parent, components.mysql);
    let mysql = run_component(&mysql, &previous.mysql_status, generation, expiry).await;
    let redis = RedisReconciler::new(gateway, parent, components.redis);
    let redis = run_component(&redis, &previous.redis_status, generation, expiry).await;
    let kafka = KafkaReconciler::new(gateway, parent, components.kafka);
    let kafka = run_component(&kafka, &previous.kafka_status, generation, expiry).await;
    let minio = MinioReconciler::new(gateway, parent, components.minio);
    let minio = run_component(&minio, &previous.minio_status, generation, expiry).await;
    let clickhouse = ClickHouseReconciler::new(gateway, parent, components.clickhouse);
    let clickhouse = run_component(&clickhouse, &previous.clickhouse_status, generation, expiry).await;

    let outcomes = [mysql, redis, kafka, minio, clickhouse];
    let enabled: Vec<&ComponentOutcome> = outcomes.iter().filter(|o| o.enabled).collect();
    let requeue = enabled
        .iter()
        .map(|o| o.requeue_after())
        .min()
        .unwrap_or(InfraState::Healthy.requeue_after());
    let state = aggregate(enabled.iter().map(|o| o.status.state));
    let ready = enabled.iter().all(|o| o.status.ready);

    let [mysql, redis, kafka, minio, clickhouse] = outcomes;
    let status = WandbStatus {
        ready,
        state,
        observed_generation: generation,
        mysql_status: mysql.status,
        redis_status: redis.status,
        kafka_status: kafka.status,
        minio_status: minio.status,
        clickhouse_status: clickhouse.status,
    };
    persist_status(gateway, &key, &status).await?;

    if let Some(e) = [mysql.error, redis.error, kafka.error, minio.error, clickhouse.error]
        .into_iter()
        .flatten()
        .next()
    {
        return Err(e);
    }

    info!(name = %key, state = %state, ready, requeue_secs = requeue.as_secs(), "Reconciled");
    Ok(Action::requeue(requeue))
}
