//! Status conditions and the merge engine
//!
//! Every component reports a list of typed conditions. Freshly observed
//! conditions are folded into the persisted list with
//! [`compute_condition_updates`], which keeps transition times stable for
//! unchanged entries and sweeps entries older than the expiry window.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// Condition reasons
pub const REASON_PENDING_CREATE: &str = "PendingCreate";
pub const REASON_PENDING_DELETE: &str = "PendingDelete";
pub const REASON_RESOURCE_EXISTS: &str = "ResourceExists";
pub const REASON_NO_RESOURCE: &str = "NoResource";
pub const REASON_API_ERROR: &str = "ApiError";
pub const REASON_CONTROLLER_ERROR: &str = "ControllerError";
pub const REASON_RESOURCE_ERROR: &str = "ResourceError";
pub const REASON_FAILED_TO_CREATE: &str = "FailedToCreate";
pub const REASON_DEPLOYMENT_CONFLICT: &str = "DeploymentConflict";
pub const REASON_NOT_READY: &str = "NotReady";
pub const REASON_UNKNOWN: &str = "Unknown";
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// Condition type shared by every component for tick-level failures.
pub const CONDITION_RECONCILED: &str = "Reconciled";

/// Finalizer placed on the parent resource
pub const WANDB_FINALIZER: &str = "wandb.apps.wandb.com/cleanup";

/// Default age after which a condition is swept from the status.
pub const DEFAULT_CONDITION_EXPIRY: std::time::Duration = std::time::Duration::from_secs(2 * 60 * 60);

/// Tri-state condition status following the Kubernetes API conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl ConditionStatus {
    /// Parse the string form used by vendor operators, ignoring case.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("true") {
            ConditionStatus::True
        } else if value.eq_ignore_ascii_case("false") {
            ConditionStatus::False
        } else {
            ConditionStatus::Unknown
        }
    }
}

/// A single condition in a component status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraCondition {
    /// Component-scoped condition type, e.g. `KafkaConnectionInfo`
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    pub last_transition_time: DateTime<Utc>,

    #[serde(default)]
    pub observed_generation: i64,
}

impl InfraCondition {
    /// Build a condition stamped with the current time and generation zero.
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: 0,
        }
    }

    /// Whether status, reason and message all match.
    pub fn same_observation(&self, other: &InfraCondition) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(
    conditions: &'a [InfraCondition],
    condition_type: &str,
) -> Option<&'a InfraCondition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Keep only the last occurrence of each type, at the slot of its first occurrence.
fn dedupe_by_type(conditions: &[InfraCondition]) -> Vec<InfraCondition> {
    let mut result: Vec<InfraCondition> = Vec::with_capacity(conditions.len());
    for condition in conditions {
        match result
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => *existing = condition.clone(),
            None => result.push(condition.clone()),
        }
    }
    result
}

/// Merge freshly observed conditions into the persisted list.
pub fn compute_condition_updates(
    old: &[InfraCondition],
    current: &[InfraCondition],
    generation: i64,
    expiry: std::time::Duration,
) -> Vec<InfraCondition> {
    compute_condition_updates_at(old, current, generation, expiry, Utc::now())
}

/// [`compute_condition_updates`] against an explicit clock.
pub fn compute_condition_updates_at(
    old: &[InfraCondition],
    current: &[InfraCondition],
    generation: i64,
    expiry: std::time::Duration,
    now: DateTime<Utc>,
) -> Vec<InfraCondition> {
    let old = dedupe_by_type(old);
    let current: Vec<InfraCondition> = dedupe_by_type(current)
        .into_iter()
        .map(|mut c| {
            c.last_transition_time = now;
            c.observed_generation = generation;
            c
        })
        .collect();

    let mut merged: Vec<InfraCondition> = Vec::with_capacity(old.len() + current.len());
    for o in &old {
        match find_condition(&current, &o.condition_type) {
            Some(c) if !o.same_observation(c) => merged.push(c.clone()),
            _ => merged.push(o.clone()),
        }
    }
    for c in &current {
        if find_condition(&old, &c.condition_type).is_none() {
            merged.push(c.clone());
        }
    }

    let cutoff = now - Duration::from_std(expiry).unwrap_or_else(|_| Duration::hours(2));
    merged.retain(|c| c.last_transition_time > cutoff);
    merged
}
