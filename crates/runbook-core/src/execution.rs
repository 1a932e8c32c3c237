// crates/runbook-core/src/execution.rs
// ============================================================================
// Module: Execution & Step Results
// Description: The per-run record, its per-step results, and the approval queue entry shape (§3).
// Purpose: Give the store, orchestrator, and CLI a shared, serializable run record.
// Dependencies: runbook-core::{action, context, identifiers, runbook, state_machine}
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::action::Action;
use crate::context::ExecutionContext;
use crate::identifiers::ExecutionId;
use crate::identifiers::RequestId;
use crate::identifiers::RunbookId;
use crate::identifiers::StepId;
use crate::runbook::ExecutionMode;
use crate::state_machine::ExecutionState;

/// A durable record of a single run of a runbook (§3 `Execution`).
///
/// Created once on orchestrator start and mutated only through legal
/// [`crate::state_machine`] transitions thereafter; never deleted (§3
/// "Ownership").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this run.
    pub execution_id: ExecutionId,
    /// The runbook this run executes.
    pub runbook_id: RunbookId,
    /// The runbook version pinned at start.
    pub runbook_version: String,
    /// The runbook name, denormalized for display without a join.
    pub runbook_name: String,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// The mode this run is executing under.
    pub mode: ExecutionMode,
    /// The current context snapshot (the orchestrator's "tip").
    pub context: ExecutionContext,
    /// Error summary, present once the run reaches `failed`.
    pub error: Option<String>,
    /// ISO-8601 start time.
    pub started_at: String,
    /// ISO-8601 completion time, once terminal.
    pub completed_at: Option<String>,
    /// Wall-clock duration in milliseconds, once terminal.
    pub duration_ms: Option<u64>,
}

impl Execution {
    /// Creates a new execution in the [`ExecutionState::Idle`] state.
    #[must_use]
    pub fn new(
        runbook_id: RunbookId,
        runbook_version: impl Into<String>,
        runbook_name: impl Into<String>,
        mode: ExecutionMode,
        context: ExecutionContext,
        started_at: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            runbook_id,
            runbook_version: runbook_version.into(),
            runbook_name: runbook_name.into(),
            state: ExecutionState::Idle,
            mode,
            context,
            error: None,
            started_at: started_at.into(),
            completed_at: None,
            duration_ms: None,
        }
    }
}

/// A structured, data (never thrown) error attached to a [`StepResult`] (§3, §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Stable error code.
    pub code: String,
    /// Human-facing message (sanitized before reaching a user surface).
    pub message: String,
    /// Whether the retry wrapper should retry this error.
    pub retryable: bool,
}

/// Outcome of a human approval decision attached to a [`StepResult`] when
/// the step passed through the approval gate (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// The queue entry this decision corresponds to, if one was created
    /// (L1 approvals resolved synchronously create none; L2-queued
    /// entries do).
    pub request_id: Option<RequestId>,
    /// `approved`, `denied`, or `expired`.
    pub status: String,
    /// The approver identity, or `system:auto-approve` on timeout auto-approve.
    pub approver: Option<String>,
    /// Reason, populated for denials and timeout outcomes.
    pub reason: Option<String>,
    /// ISO-8601 time the decision was recorded.
    pub responded_at: String,
    /// Milliseconds spent waiting for the decision.
    pub duration_ms: u64,
}

/// The result of executing (or skipping) a single step (§3 `StepResult`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step this result belongs to.
    pub step_id: StepId,
    /// The action that was invoked.
    pub action: Action,
    /// The adapter name that executed it.
    pub executor: String,
    /// Whether the step is considered successful.
    ///
    /// A skipped step (`skipped = true`) is represented with
    /// `success = true`, per the documented choice for the "expired-skip"
    /// open question in `DESIGN.md`.
    pub success: bool,
    /// Whether this step was skipped rather than executed.
    pub skipped: bool,
    /// ISO-8601 start time.
    pub started_at: String,
    /// ISO-8601 completion time.
    pub completed_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Opaque adapter output.
    pub output: Value,
    /// Structured error, present on failure.
    pub error: Option<StepError>,
    /// Adapter-supplied metadata (attempt count, circuit-breaker state, ...).
    pub metadata: Value,
    /// Approval decision, present when this step passed through the gate.
    pub approval: Option<ApprovalRecord>,
}

/// Status of an [`ApprovalQueueEntry`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalQueueStatus {
    /// Awaiting a human decision.
    Pending,
    /// Approved, not yet executed against the real adapter.
    Approved,
    /// Denied.
    Denied,
    /// Approved and subsequently dispatched in production.
    Executed,
    /// The approval window elapsed without a decision.
    Expired,
}

/// A durable, queued write-action proposal generated by an L2 run (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalQueueEntry {
    /// Unique identifier for this queue entry.
    pub request_id: RequestId,
    /// The execution that generated this entry.
    pub execution_id: ExecutionId,
    /// The runbook id.
    pub runbook_id: RunbookId,
    /// The runbook name, denormalized for display.
    pub runbook_name: String,
    /// The step id this entry was generated for.
    pub step_id: StepId,
    /// The step name, denormalized for display.
    pub step_name: String,
    /// The adapter name that will execute the action once promoted.
    pub executor: String,
    /// The action proposed.
    pub action: Action,
    /// Templated parameters for the proposed action.
    pub parameters: serde_json::Map<String, Value>,
    /// The synthesized simulation output produced instead of a real call.
    pub simulation_result: Value,
    /// Current status.
    pub status: ApprovalQueueStatus,
    /// ISO-8601 time the entry was queued.
    pub requested_at: String,
    /// ISO-8601 time after which the entry is considered expired.
    pub expires_at: String,
    /// The approver identity, once decided.
    pub approver: Option<String>,
    /// ISO-8601 time the decision was recorded.
    pub approved_at: Option<String>,
    /// Reason given for a denial.
    pub denial_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ExecutionState;
    use std::collections::HashMap;

    #[test]
    fn new_execution_starts_idle_with_no_terminal_fields() {
        let ctx = ExecutionContext::new(serde_json::json!({}), HashMap::new());
        let execution = Execution::new(
            RunbookId::new("3fa85f64-5717-4562-b3fc-2c963f66afa6"),
            "1.0.0",
            "Isolate and Notify",
            ExecutionMode::Production,
            ctx,
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(execution.state, ExecutionState::Idle);
        assert!(execution.completed_at.is_none());
        assert!(execution.duration_ms.is_none());
        assert!(execution.error.is_none());
    }

    #[test]
    fn step_result_serializes_skipped_steps_as_successful() {
        let result = StepResult {
            step_id: StepId::from("step-01"),
            action: Action::Wait,
            executor: "noop".to_owned(),
            success: true,
            skipped: true,
            started_at: "2026-01-01T00:00:00Z".to_owned(),
            completed_at: "2026-01-01T00:00:00Z".to_owned(),
            duration_ms: 0,
            output: Value::Null,
            error: None,
            metadata: serde_json::json!({}),
            approval: None,
        };
        assert!(result.success);
        assert!(result.skipped);
    }
}
