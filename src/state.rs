//! State inference
//!
//! Projects a component's conditions onto the severity lattice
//! `Error > Unavailable > Pending > Degraded > Unknown > Healthy` and
//! derives readiness and the requeue delay from the result.

use crate::conditions::{
    find_condition, ConditionStatus, InfraCondition, CONDITION_RECONCILED, REASON_NO_RESOURCE,
    REASON_PENDING_CREATE, REASON_PENDING_DELETE,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Component health, declared from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
pub enum InfraState {
    Healthy,
    #[default]
    Unknown,
    Degraded,
    Pending,
    Unavailable,
    Error,
}

impl fmt::Display for InfraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfraState::Healthy => "Healthy",
            InfraState::Unknown => "Unknown",
            InfraState::Degraded => "Degraded",
            InfraState::Pending => "Pending",
            InfraState::Unavailable => "Unavailable",
            InfraState::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

impl InfraState {
    /// A component is ready unless it is failing, starting or gone.
    pub fn is_ready(self) -> bool {
        !matches!(
            self,
            InfraState::Error | InfraState::Pending | InfraState::Unavailable
        )
    }

    pub fn requeue_after(self) -> Duration {
        match self {
            InfraState::Error => Duration::from_secs(15),
            InfraState::Pending => Duration::from_secs(2 * 60),
            InfraState::Degraded => Duration::from_secs(5 * 60),
            InfraState::Healthy => Duration::from_secs(10 * 60),
            _ => Duration::from_secs(3 * 60),
        }
    }
}

/// How a condition type is projected onto the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Derived from the CRUD action taken on a vendor resource.
    Lifecycle,
    /// Whether the connection secret was published.
    ConnectionInfo,
    /// The vendor operator's own readiness report.
    Reported {
        /// Reasons (matched ignoring case) with a dedicated state when False.
        on_false: &'static [(&'static str, InfraState)],
        /// State for any other False reason.
        otherwise: InfraState,
    },
    /// Tick-level failures: False is always an error.
    Fault,
}

impl ConditionKind {
    /// Whether a missing condition of this kind counts as `Unknown`.
    fn expected(&self) -> bool {
        !matches!(self, ConditionKind::Fault)
    }

    /// Map one condition to the state it implies.
    pub fn project(&self, condition: &InfraCondition) -> InfraState {
        match condition.status {
            ConditionStatus::True => return InfraState::Healthy,
            ConditionStatus::Unknown => return InfraState::Unknown,
            ConditionStatus::False => {}
        }
        match self {
            ConditionKind::Lifecycle => match condition.reason.as_str() {
                REASON_PENDING_CREATE => InfraState::Pending,
                REASON_PENDING_DELETE => InfraState::Unavailable,
                _ => InfraState::Unknown,
            },
            ConditionKind::ConnectionInfo => InfraState::Degraded,
            ConditionKind::Reported { on_false, otherwise } => on_false
                .iter()
                .find(|(reason, _)| reason.eq_ignore_ascii_case(&condition.reason))
                .map(|(_, state)| *state)
                .unwrap_or(*otherwise),
            ConditionKind::Fault => InfraState::Error,
        }
    }
}

/// The per-component rule table: one entry per condition type.
#[derive(Debug, Clone, Copy)]
pub struct ComponentRules {
    pub component: &'static str,
    pub connection_type: &'static str,
    pub kinds: &'static [(&'static str, ConditionKind)],
}

impl ComponentRules {
    pub fn kind_of(&self, condition_type: &str) -> Option<ConditionKind> {
        if condition_type == CONDITION_RECONCILED {
            return Some(ConditionKind::Fault);
        }
        self.kinds
            .iter()
            .find(|(t, _)| *t == condition_type)
            .map(|(_, kind)| *kind)
    }

    /// Inject a `False/NoResource` connection condition when none was observed.
    pub fn apply_default_conditions(&self, current: &mut Vec<InfraCondition>) {
        if find_condition(current, self.connection_type).is_none() {
            current.push(InfraCondition::new(
                self.connection_type,
                ConditionStatus::False,
                REASON_NO_RESOURCE,
                "",
            ));
        }
    }

    /// Implied state for every known type, `Unknown` for expected but absent ones.
    pub fn implied_states(&self, conditions: &[InfraCondition]) -> Vec<(&'static str, InfraState)> {
        let mut implied = Vec::with_capacity(self.kinds.len() + 1);
        for (condition_type, kind) in self.kinds {
            match find_condition(conditions, condition_type) {
                Some(condition) => implied.push((*condition_type, kind.project(condition))),
                None if kind.expected() => implied.push((*condition_type, InfraState::Unknown)),
                None => {}
            }
        }
        if let Some(condition) = find_condition(conditions, CONDITION_RECONCILED) {
            implied.push((CONDITION_RECONCILED, ConditionKind::Fault.project(condition)));
        }
        implied
    }

    /// The most severe implied state, `Unknown` if nothing is implied.
    pub fn infer_state(&self, conditions: &[InfraCondition]) -> InfraState {
        aggregate(self.implied_states(conditions).into_iter().map(|(_, s)| s))
    }
}

/// Fold a set of states to the most severe one.
pub fn aggregate(states: impl IntoIterator<Item = InfraState>) -> InfraState {
    states.into_iter().max().unwrap_or(InfraState::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{REASON_API_ERROR, REASON_RESOURCE_EXISTS};

    const RULES: ComponentRules = ComponentRules {
        component: "test",
        connection_type: "TestConnectionInfo",
        kinds: &[
            ("TestCustomResource", ConditionKind::Lifecycle),
            ("TestConnectionInfo", ConditionKind::ConnectionInfo),
            (
                "TestReportedReady",
                ConditionKind::Reported {
                    on_false: &[("error", InfraState::Error), ("initializing", InfraState::Pending)],
                    otherwise: InfraState::Unavailable,
                },
            ),
        ],
    };

    fn cond(t: &str, status: ConditionStatus, reason: &str) -> InfraCondition {
        InfraCondition::new(t, status, reason, "")
    }

    fn all_healthy() -> Vec<InfraCondition> {
        vec![
            cond("TestCustomResource", ConditionStatus::True, REASON_RESOURCE_EXISTS),
            cond("TestConnectionInfo", ConditionStatus::True, REASON_RESOURCE_EXISTS),
            cond("TestReportedReady", ConditionStatus::True, "ready"),
        ]
    }

    #[test]
    fn test_lattice_order() {
        assert!(InfraState::Error > InfraState::Unavailable);
        assert!(InfraState::Unavailable > InfraState::Pending);
        assert!(InfraState::Pending > InfraState::Degraded);
        assert!(InfraState::Degraded > InfraState::Unknown);
        assert!(InfraState::Unknown > InfraState::Healthy);
    }

    #[test]
    fn test_all_true_is_healthy() {
        assert_eq!(RULES.infer_state(&all_healthy()), InfraState::Healthy);
    }

    #[test]
    fn test_missing_expected_type_is_unknown() {
        let mut conditions = all_healthy();
        conditions.retain(|c| c.condition_type != "TestReportedReady");
        assert_eq!(RULES.infer_state(&conditions), InfraState::Unknown);
    }

    #[test]
    fn test_any_error_wins() {
        let mut conditions = all_healthy();
        conditions.push(cond("TestCustomResource", ConditionStatus::False, REASON_PENDING_CREATE));
        conditions.push(cond(CONDITION_RECONCILED, ConditionStatus::False, REASON_API_ERROR));
        assert_eq!(RULES.infer_state(&conditions), InfraState::Error);
    }

    #[test]
    fn test_lifecycle_projection() {
        let kind = ConditionKind::Lifecycle;
        assert_eq!(
            kind.project(&cond("T", ConditionStatus::False, REASON_PENDING_CREATE)),
            InfraState::Pending
        );
        assert_eq!(
            kind.project(&cond("T", ConditionStatus::False, REASON_PENDING_DELETE)),
            InfraState::Unavailable
        );
        assert_eq!(
            kind.project(&cond("T", ConditionStatus::False, REASON_NO_RESOURCE)),
            InfraState::Unknown
        );
    }

    #[test]
    fn test_reported_projection_uses_table() {
        let conditions = vec![
            cond("TestCustomResource", ConditionStatus::True, REASON_RESOURCE_EXISTS),
            cond("TestConnectionInfo", ConditionStatus::True, REASON_RESOURCE_EXISTS),
            cond("TestReportedReady", ConditionStatus::False, "Initializing"),
        ];
        assert_eq!(RULES.infer_state(&conditions), InfraState::Pending);

        let conditions = vec![cond("TestReportedReady", ConditionStatus::False, "paused")];
        let implied = RULES.implied_states(&conditions);
        assert!(implied.contains(&("TestReportedReady", InfraState::Unavailable)));
    }

    #[test]
    fn test_default_connection_condition_injected_when_absent() {
        let mut current = vec![cond("TestCustomResource", ConditionStatus::False, REASON_PENDING_CREATE)];
        RULES.apply_default_conditions(&mut current);
        let injected = find_condition(&current, "TestConnectionInfo").unwrap();
        assert_eq!(injected.status, ConditionStatus::False);
        assert_eq!(injected.reason, REASON_NO_RESOURCE);

        // Present conditions are left alone
        let mut current = all_healthy();
        RULES.apply_default_conditions(&mut current);
        assert_eq!(current.len(), 3);
    }

    #[test]
    fn test_ready_derivation() {
        for state in [
            InfraState::Healthy,
            InfraState::Unknown,
            InfraState::Degraded,
            InfraState::Pending,
            InfraState::Unavailable,
            InfraState::Error,
        ] {
            let expected = !matches!(
                state,
                InfraState::Error | InfraState::Pending | InfraState::Unavailable
            );
            assert_eq!(state.is_ready(), expected, "{}", state);
        }
    }

    #[test]
    fn test_requeue_table() {
        assert_eq!(InfraState::Error.requeue_after(), Duration::from_secs(15));
        assert_eq!(InfraState::Pending.requeue_after(), Duration::from_secs(120));
        assert_eq!(InfraState::Degraded.requeue_after(), Duration::from_secs(300));
        assert_eq!(InfraState::Healthy.requeue_after(), Duration::from_secs(600));
        assert_eq!(InfraState::Unknown.requeue_after(), Duration::from_secs(180));
        assert_eq!(InfraState::Unavailable.requeue_after(), Duration::from_secs(180));
    }

    #[test]
    fn test_aggregate_empty_is_unknown() {
        assert_eq!(aggregate(Vec::new()), InfraState::Unknown);
    }
}
