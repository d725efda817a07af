//! W&B Infrastructure Operator
//!
//! A Kubernetes operator that provisions the stateful backing services of a
//! W&B deployment by driving third-party operators.
//!
//! ## Custom Resources
//!
//! - `WeightsAndBiases`: the parent resource, one block per component
//! - Driven vendor resources: Percona `PerconaXtraDBCluster`, opstree
//!   `Redis`/`RedisSentinel`/`RedisReplication`, Strimzi
//!   `Kafka`/`KafkaNodePool`, MinIO `Tenant`, Altinity
//!   `ClickHouseInstallation`
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: apps.wandb.com/v2
//! kind: WeightsAndBiases
//! metadata:
//!   name: wandb
//!   namespace: wandb
//! spec:
//!   size: small
//!   kafka:
//!     retentionPolicy: Retain
//! ```

pub mod conditions;
pub mod config;
pub mod connection;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod gateway;
pub mod names;
pub mod presets;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::OperatorConfig;
pub use controllers::WandbController;
pub use crd::{InfraStatus, WandbSpec, WandbStatus, WeightsAndBiases};
pub use error::{OperatorError, Result};
pub use state::InfraState;
