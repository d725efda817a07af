//! Controllers for the W&B infrastructure operator
//!
//! The WeightsAndBiases controller watches the parent resource and fans out
//! to one reconciler per infrastructure component.

pub mod infra;
mod wandb;

pub use wandb::{reconcile_parent, WandbController};

use crate::error::OperatorError;
use std::time::Duration;

/// Requeue delay applied by the controller error policy.
pub fn error_policy_backoff(error: &OperatorError) -> Duration {
    match error {
        OperatorError::KubeApi(_) => Duration::from_secs(15),
        OperatorError::Configuration(_) => Duration::from_secs(300),
        _ => Duration::from_secs(30),
    }
}
