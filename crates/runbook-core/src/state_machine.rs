// crates/runbook-core/src/state_machine.rs
// ============================================================================
// Module: Execution State Machine
// Description: Lifecycle states and legal transitions for an Execution (§4.5).
// Purpose: Make illegal lifecycle transitions a compile-time-checked, audit-logged error.
// Dependencies: serde
// ============================================================================

//! The state machine itself does not persist anything — it only decides
//! whether a requested transition is legal. The caller (the orchestrator)
//! is responsible for writing the new state and an [`crate::audit`] entry
//! atomically, per §4.5 "Every transition writes an AuditEntry atomically
//! with the Store row update."

use serde::Deserialize;
use serde::Serialize;

/// Lifecycle state of an [`crate::execution::Execution`] (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, not yet planned.
    Idle,
    /// Resolving the runbook and building the initial context.
    Planning,
    /// Suspended at an approval gate.
    AwaitingApproval,
    /// Steps are being dispatched.
    Executing,
    /// Every step finished successfully (or was skipped).
    Completed,
    /// The execution ended unsuccessfully.
    Failed,
    /// The execution was cancelled.
    Cancelled,
    /// The execution exceeded its execution-wide timeout.
    TimedOut,
    /// Rollback of completed steps ran after a failure.
    RolledBack,
}

impl ExecutionState {
    /// Returns `true` when this state has no legal outgoing transitions
    /// other than the one other terminal-adjacent case (`Failed ->
    /// RolledBack`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::TimedOut | Self::RolledBack
        )
    }

    fn allowed_next(self) -> &'static [ExecutionState] {
        use ExecutionState::{
            AwaitingApproval, Cancelled, Completed, Executing, Failed, Idle, Planning,
            RolledBack, TimedOut,
        };
        match self {
            Self::Idle => &[Planning],
            Self::Planning => &[Executing, AwaitingApproval, Failed],
            Self::AwaitingApproval => &[Executing, Failed, Cancelled],
            Self::Executing => {
                &[AwaitingApproval, Completed, Failed, Cancelled, TimedOut, RolledBack]
            }
            Self::Failed => &[RolledBack],
            Self::Completed | Self::Cancelled | Self::TimedOut | Self::RolledBack => &[],
        }
    }
}

/// Error returned when a transition is not in the legal-transitions table
/// (§4.5). Stable and audit-logged, never a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition from {from:?} to {to:?}")]
pub struct TransitionError {
    /// The state the execution was in.
    pub from: ExecutionState,
    /// The state that was requested.
    pub to: ExecutionState,
}

/// Checks whether moving from `from` to `to` is a legal transition
/// (§4.5). Does not mutate anything; the caller applies the new state.
///
/// # Errors
///
/// Returns [`TransitionError`] when `to` is not in `from`'s legal
/// transition set.
pub fn transition(from: ExecutionState, to: ExecutionState) -> Result<(), TransitionError> {
    if from.allowed_next().contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionState::{
        AwaitingApproval, Cancelled, Completed, Executing, Failed, Idle, Planning, RolledBack,
        TimedOut,
    };

    #[test]
    fn idle_may_only_advance_to_planning() {
        assert!(transition(Idle, Planning).is_ok());
        assert!(transition(Idle, Executing).is_err());
    }

    #[test]
    fn planning_can_reach_executing_awaiting_approval_or_failed() {
        assert!(transition(Planning, Executing).is_ok());
        assert!(transition(Planning, AwaitingApproval).is_ok());
        assert!(transition(Planning, Failed).is_ok());
        assert!(transition(Planning, Completed).is_err());
    }

    #[test]
    fn awaiting_approval_can_resume_fail_or_cancel() {
        assert!(transition(AwaitingApproval, Executing).is_ok());
        assert!(transition(AwaitingApproval, Failed).is_ok());
        assert!(transition(AwaitingApproval, Cancelled).is_ok());
        assert!(transition(AwaitingApproval, Completed).is_err());
    }

    #[test]
    fn executing_can_reach_every_outcome_state() {
        for to in [AwaitingApproval, Completed, Failed, Cancelled, TimedOut, RolledBack] {
            assert!(transition(Executing, to).is_ok(), "{to:?} should be reachable");
        }
        assert!(transition(Executing, Idle).is_err());
    }

    #[test]
    fn failed_may_only_advance_to_rolled_back() {
        assert!(transition(Failed, RolledBack).is_ok());
        assert!(transition(Failed, Completed).is_err());
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        for terminal in [Completed, Cancelled, TimedOut, RolledBack] {
            assert!(terminal.is_terminal());
            assert!(transition(terminal, Idle).is_err());
            assert!(transition(terminal, Executing).is_err());
        }
    }

    #[test]
    fn illegal_transition_error_carries_both_states() {
        let err = transition(Idle, Completed).unwrap_err();
        assert_eq!(err.from, Idle);
        assert_eq!(err.to, Completed);
    }
}
