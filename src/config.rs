//! Operator-wide settings, populated from command-line flags and environment

use std::time::Duration;

use crate::conditions::DEFAULT_CONDITION_EXPIRY;

pub const DEFAULT_REDIS_MASTER_NAME: &str = "gorilla";
pub const DEFAULT_CLICKHOUSE_USER: &str = "wandb";
pub const DEFAULT_MYSQL_USER: &str = "root";
pub const DEFAULT_MINIO_ROOT_USER: &str = "admin";

/// Settings shared by every reconcile tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; empty watches all namespaces
    pub namespace: String,
    /// Age after which a condition is swept from component status
    pub condition_expiry: Duration,
    /// Sentinel master name used when the parent spec does not set one
    pub redis_master_name: String,
    /// User published in the ClickHouse connection URL
    pub clickhouse_user: String,
    /// User published in the MySQL connection URL
    pub mysql_user: String,
    /// MinIO root user written on first creation of the config secret
    pub minio_root_user: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            condition_expiry: DEFAULT_CONDITION_EXPIRY,
            redis_master_name: DEFAULT_REDIS_MASTER_NAME.to_string(),
            clickhouse_user: DEFAULT_CLICKHOUSE_USER.to_string(),
            mysql_user: DEFAULT_MYSQL_USER.to_string(),
            minio_root_user: DEFAULT_MINIO_ROOT_USER.to_string(),
        }
    }
}
