//! W&B Infrastructure Operator
//!
//! Watches `WeightsAndBiases` resources and reconciles their MySQL, Redis,
//! Kafka, MinIO and ClickHouse components.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! wandb-infra-operator
//!
//! # Watch a single namespace with debug logging
//! RUST_LOG=debug wandb-infra-operator --namespace wandb
//! ```

use clap::Parser;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wandb_infra_operator::config::{
    DEFAULT_CLICKHOUSE_USER, DEFAULT_MINIO_ROOT_USER, DEFAULT_MYSQL_USER, DEFAULT_REDIS_MASTER_NAME,
};
use wandb_infra_operator::{OperatorConfig, WandbController};

/// W&B Infrastructure Operator
#[derive(Parser, Debug)]
#[command(name = "wandb-infra-operator")]
#[command(version, about = "Kubernetes operator for W&B infrastructure components")]
struct Args {
    /// Namespace to watch (empty for all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Age in seconds after which a status condition is dropped
    #[arg(long, env = "CONDITION_EXPIRY_SECS", default_value_t = 7200)]
    condition_expiry_secs: u64,

    /// Sentinel master name used when the parent does not set one
    #[arg(long, env = "REDIS_MASTER_NAME", default_value = DEFAULT_REDIS_MASTER_NAME)]
    redis_master_name: String,

    /// ClickHouse user published in the connection URL
    #[arg(long, env = "CLICKHOUSE_USER", default_value = DEFAULT_CLICKHOUSE_USER)]
    clickhouse_user: String,

    /// MySQL user published in the connection URL
    #[arg(long, env = "MYSQL_USER", default_value = DEFAULT_MYSQL_USER)]
    mysql_user: String,

    /// MinIO root user written when the config secret is first created
    #[arg(long, env = "MINIO_ROOT_USER", default_value = DEFAULT_MINIO_ROOT_USER)]
    minio_root_user: String,
}

impl From<Args> for OperatorConfig {
    fn from(args: Args) -> Self {
        Self {
            namespace: args.namespace,
            condition_expiry: Duration::from_secs(args.condition_expiry_secs),
            redis_master_name: args.redis_master_name,
            clickhouse_user: args.clickhouse_user,
            mysql_user: args.mysql_user,
            minio_root_user: args.minio_root_user,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = OperatorConfig::from(Args::parse());

    info!("Starting W&B infrastructure operator");
    info!(
        "Watching namespace: {}",
        if config.namespace.is_empty() {
            "all"
        } else {
            &config.namespace
        }
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let controller = Arc::new(WandbController::new(client, config));
    controller.run().await?;

    info!("Operator shut down");
    Ok(())
}
