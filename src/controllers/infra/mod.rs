//! Component reconcilers
//!
//! Every infrastructure component runs the same skeleton per tick: read the
//! vendor resources, build the desired ones, drive them through
//! [`crud_resource`](crate::gateway::crud_resource), turn what happened into
//! [`Signal`]s, publish the connection secret and fold the result into an
//! [`InfraStatus`]. Only the vendor-specific parts live in the submodules.

pub mod clickhouse;
pub mod kafka;
pub mod minio;
pub mod mysql;
pub mod redis;

use crate::conditions::{
    compute_condition_updates, find_condition, ConditionStatus, InfraCondition, CONDITION_RECONCILED,
    REASON_API_ERROR, REASON_CONTROLLER_ERROR, REASON_NO_RESOURCE, REASON_PENDING_CREATE,
    REASON_PENDING_DELETE, REASON_RECONCILE_SUCCESS, REASON_RESOURCE_EXISTS,
};
use crate::crd::{InfraConnection, InfraStatus};
use crate::error::{OperatorError, Result};
use crate::gateway::CrudAction;
use crate::state::{aggregate, ComponentRules, ConditionKind, InfraState};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, warn, Instrument, Span};

/// One observation made during a tick, tagged by how it is projected.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// What the CRUD step did to a vendor resource.
    Lifecycle {
        condition_type: &'static str,
        action: CrudAction,
    },
    /// Whether a complete connection secret was published.
    ConnectionInfo {
        condition_type: &'static str,
        secret: Option<String>,
    },
    /// The vendor operator's own readiness report.
    Reported {
        condition_type: &'static str,
        status: ConditionStatus,
        reason: String,
        message: String,
    },
    /// An invariant check; False is always an error.
    Fault {
        condition_type: &'static str,
        status: ConditionStatus,
        reason: String,
        message: String,
    },
}

impl Signal {
    pub fn lifecycle(condition_type: &'static str, action: CrudAction) -> Self {
        Signal::Lifecycle {
            condition_type,
            action,
        }
    }

    pub fn reported(
        condition_type: &'static str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Signal::Reported {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn into_condition(self) -> InfraCondition {
        match self {
            Signal::Lifecycle {
                condition_type,
                action,
            } => {
                let (status, reason) = match action {
                    CrudAction::Create => (ConditionStatus::False, REASON_PENDING_CREATE),
                    CrudAction::Update => (ConditionStatus::True, REASON_RESOURCE_EXISTS),
                    CrudAction::Delete => (ConditionStatus::False, REASON_PENDING_DELETE),
                    CrudAction::None => (ConditionStatus::False, REASON_NO_RESOURCE),
                };
                InfraCondition::new(condition_type, status, reason, "")
            }
            Signal::ConnectionInfo {
                condition_type,
                secret: Some(name),
            } => InfraCondition::new(
                condition_type,
                ConditionStatus::True,
                REASON_RESOURCE_EXISTS,
                name,
            ),
            Signal::ConnectionInfo {
                condition_type,
                secret: None,
            } => InfraCondition::new(condition_type, ConditionStatus::False, REASON_NO_RESOURCE, ""),
            Signal::Reported {
                condition_type,
                status,
                reason,
                message,
            }
            | Signal::Fault {
                condition_type,
                status,
                reason,
                message,
            } => InfraCondition::new(condition_type, status, reason, message),
        }
    }
}

/// What one component tick produced.
#[derive(Debug, Default)]
pub struct Observation {
    pub signals: Vec<Signal>,
    pub connection: Option<InfraConnection>,
    /// Condition types to drop from the persisted list before merging.
    pub retired: Vec<&'static str>,
}

impl Observation {
    pub fn push(&mut self, signal: Signal) {
        self.signals.push(signal);
    }
}

/// A vendor-specific reconciler for one component.
#[async_trait]
pub trait ComponentReconciler: Send + Sync {
    fn rules(&self) -> &'static ComponentRules;

    fn enabled(&self) -> bool;

    fn span(&self) -> &Span;

    /// Run one tick against the cluster.
    async fn observe(&self) -> Result<Observation>;
}

/// Result of running one component.
#[derive(Debug)]
pub struct ComponentOutcome {
    pub status: InfraStatus,
    pub enabled: bool,
    /// Failure that should abort the parent tick once status is persisted.
    pub error: Option<OperatorError>,
}

impl ComponentOutcome {
    pub fn requeue_after(&self) -> Duration {
        self.status.state.requeue_after()
    }
}

fn reconciled_condition(error: Option<&OperatorError>) -> InfraCondition {
    match error {
        None => InfraCondition::new(
            CONDITION_RECONCILED,
            ConditionStatus::True,
            REASON_RECONCILE_SUCCESS,
            "",
        ),
        Some(e @ OperatorError::KubeApi(_)) => InfraCondition::new(
            CONDITION_RECONCILED,
            ConditionStatus::False,
            REASON_API_ERROR,
            e.to_string(),
        ),
        Some(e) => InfraCondition::new(
            CONDITION_RECONCILED,
            ConditionStatus::False,
            REASON_CONTROLLER_ERROR,
            e.to_string(),
        ),
    }
}

/// Fold freshly observed conditions into a component status.
///
/// A disabled component is `Unavailable` (or `Error` when its tick failed)
/// and gets no default connection condition.
#[allow(clippy::too_many_arguments)]
pub fn compute_status(
    rules: &ComponentRules,
    previous: &InfraStatus,
    enabled: bool,
    mut current: Vec<InfraCondition>,
    retired: &[&str],
    connection: Option<InfraConnection>,
    generation: i64,
    expiry: Duration,
) -> InfraStatus {
    if enabled {
        rules.apply_default_conditions(&mut current);
    }

    let old: Vec<InfraCondition> = previous
        .conditions
        .iter()
        .filter(|c| !retired.contains(&c.condition_type.as_str()))
        .cloned()
        .collect();
    let conditions = compute_condition_updates(&old, &current, generation, expiry);
    let state = if enabled {
        rules.infer_state(&conditions)
    } else {
        let reconciled = find_condition(&conditions, CONDITION_RECONCILED)
            .map(|c| ConditionKind::Fault.project(c));
        aggregate(std::iter::once(InfraState::Unavailable).chain(reconciled))
    };

    InfraStatus {
        ready: state.is_ready(),
        state,
        connection,
        conditions,
        last_reconciled: Some(Utc::now()),
    }
}

/// Run one component tick and compute its status.
///
/// A failed tick still yields a status: the `Reconciled` condition carries
/// the error and the previous connection reference is kept.
pub async fn run_component<R: ComponentReconciler + ?Sized>(
    reconciler: &R,
    previous: &InfraStatus,
    generation: i64,
    expiry: Duration,
) -> ComponentOutcome {
    let rules = reconciler.rules();
    let enabled = reconciler.enabled();
    let span = reconciler.span().clone();
    let observed = reconciler.observe().instrument(span).await;

    let (status, error) = match observed {
        Ok(observation) => {
            let mut current: Vec<InfraCondition> = observation
                .signals
                .into_iter()
                .map(Signal::into_condition)
                .collect();
            current.push(reconciled_condition(None));
            let status = compute_status(
                rules,
                previous,
                enabled,
                current,
                &observation.retired,
                observation.connection,
                generation,
                expiry,
            );
            (status, None)
        }
        Err(e) => {
            error!(component = rules.component, code = e.code(), error = %e, "Component reconcile failed");
            // the published connection is untouched by a failed tick
            let mut current: Vec<InfraCondition> =
                find_condition(&previous.conditions, rules.connection_type)
                    .cloned()
                    .into_iter()
                    .collect();
            current.push(reconciled_condition(Some(&e)));
            let status = compute_status(
                rules,
                previous,
                enabled,
                current,
                &[],
                previous.connection.clone(),
                generation,
                expiry,
            );
            (status, Some(e))
        }
    };

    for condition in &status.conditions {
        if let Some(kind) = rules.kind_of(&condition.condition_type) {
            if kind.project(condition) == InfraState::Error {
                warn!(
                    component = rules.component,
                    code = %condition.reason,
                    condition = %condition.condition_type,
                    message = %condition.message,
                    "Component in error"
                );
            }
        }
    }

    ComponentOutcome {
        status,
        enabled,
        error,
    }
}
