// crates/runbook-core/src/recovery.rs
// ============================================================================
// Module: Crash Recovery
// Description: Startup sweep over non-terminal executions (§5 "Crash recovery").
// Purpose: Fail safely anything left running when the process last stopped.
// Dependencies: runbook-core::{audit, identifiers, state_machine, store}
// ============================================================================

//! On startup, any execution in a non-terminal state is loaded, its audit
//! log hash chain is verified, and the engine transitions it to `failed`
//! with reason `recovered_after_crash` — unless its id is named in the
//! caller's resume set, in which case recovery leaves it untouched for a
//! caller-driven resume (§5 "Crash recovery": "unless an explicit resume
//! command is issued, which replays from the last committed step").
//!
//! This crate does not itself implement step replay: recognizing a resume
//! request and skipping the auto-fail is the core's job; actually
//! re-entering [`crate::orchestrator::run`] from the last committed step is
//! a caller concern, since it needs the original runbook and adapter
//! registry, neither of which the store retains (see DESIGN.md, "Crash
//! recovery / resume").
//!
//! The recovery transition bypasses the normal [`crate::state_machine`]
//! transition table on purpose: a crash can leave an execution in `idle`
//! or `planning`, neither of which has a legal transition straight to
//! `failed` under ordinary lifecycle rules. Recovery is not an ordinary
//! lifecycle step — it is the engine asserting "this run's owning process
//! is gone" — so it writes the terminal state and its own audit entry
//! directly rather than going through [`crate::state_machine::transition`].

use std::collections::HashSet;

use crate::audit::AuditChain;
use crate::audit::AuditKind;
use crate::audit::AuditVerificationError;
use crate::identifiers::ExecutionId;
use crate::state_machine::ExecutionState;
use crate::store::Store;
use crate::store::StoreError;

/// What happened to one non-terminal execution found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Transitioned to `failed` with reason `recovered_after_crash`. The
    /// audit chain verified cleanly.
    FailedCleanChain,
    /// Transitioned to `failed` with reason `recovered_after_crash`, but
    /// the persisted audit chain failed verification; the corruption is
    /// recorded in the payload of the recovery audit entry, not silently
    /// dropped.
    FailedCorruptChain(AuditVerificationError),
    /// Left untouched because the caller named this execution id in its
    /// resume set.
    LeftForResume,
}

/// One execution's recovery outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// The execution this outcome describes.
    pub execution_id: ExecutionId,
    /// The state the execution was found in before recovery acted.
    pub previous_state: ExecutionState,
    /// What recovery did about it.
    pub action: RecoveryAction,
}

/// Sweeps every non-terminal execution in `store`, failing each one
/// unless its id appears in `resume_ids` (§5 "Crash recovery").
///
/// Call this once, before any new work is accepted, each time the engine
/// process starts.
///
/// # Errors
///
/// Returns [`StoreError`] if listing, loading, or saving any row fails.
/// A per-execution audit-chain verification failure is not an `Err` here
/// — it is recorded as [`RecoveryAction::FailedCorruptChain`] in the
/// returned outcome so the caller can surface it without aborting
/// recovery of the remaining executions.
pub fn recover_crashed_executions(
    store: &dyn Store,
    resume_ids: &HashSet<ExecutionId>,
    now: impl Fn() -> String,
) -> Result<Vec<RecoveryOutcome>, StoreError> {
    let mut outcomes = Vec::new();

    for mut execution in store.non_terminal_executions()? {
        let execution_id = execution.execution_id.clone();
        let previous_state = execution.state;

        if resume_ids.contains(&execution_id) {
            outcomes.push(RecoveryOutcome {
                execution_id,
                previous_state,
                action: RecoveryAction::LeftForResume,
            });
            continue;
        }

        let entries = store.load_audit_entries(&execution_id)?;
        let chain = AuditChain::from_entries(entries);
        let chain_result = chain.verify();

        let timestamp = now();
        let payload = match &chain_result {
            Ok(()) => serde_json::json!({
                "event": "recovered_after_crash",
                "previous_state": format!("{previous_state:?}"),
                "chain_valid": true,
            }),
            Err(err) => serde_json::json!({
                "event": "recovered_after_crash",
                "previous_state": format!("{previous_state:?}"),
                "chain_valid": false,
                "chain_error": err.to_string(),
            }),
        };

        let mut fresh_chain = chain;
        let entry = fresh_chain
            .append(execution_id.clone(), timestamp, AuditKind::System, payload)
            .map_err(|err| StoreError::Invalid(err.to_string()))?
            .clone();
        store.append_audit_entries(std::slice::from_ref(&entry))?;

        execution.state = ExecutionState::Failed;
        execution.error = Some("recovered_after_crash".to_owned());
        store.save_execution(&execution)?;

        let action = match chain_result {
            Ok(()) => RecoveryAction::FailedCleanChain,
            Err(err) => RecoveryAction::FailedCorruptChain(err),
        };
        outcomes.push(RecoveryOutcome {
            execution_id,
            previous_state,
            action,
        });
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::execution::Execution;
    use crate::identifiers::RunbookId;
    use crate::runbook::ExecutionMode;
    use crate::store::InMemoryStore;
    use std::collections::HashMap;

    fn sample_execution(state: ExecutionState) -> Execution {
        let ctx = ExecutionContext::new(serde_json::json!({}), HashMap::new());
        let mut execution = Execution::new(
            RunbookId::new("3fa85f64-5717-4562-b3fc-2c963f66afa6"),
            "1.0.0",
            "Isolate and Notify",
            ExecutionMode::Production,
            ctx,
            "2026-01-01T00:00:00Z",
        );
        execution.state = state;
        execution
    }

    #[test]
    fn non_terminal_execution_is_failed_with_recovered_reason() {
        let store = InMemoryStore::new();
        let execution = sample_execution(ExecutionState::Executing);
        let execution_id = execution.execution_id.clone();
        store.save_execution(&execution).expect("save");

        let outcomes =
            recover_crashed_executions(&store, &HashSet::new(), || "2026-01-02T00:00:00Z".to_owned())
                .expect("recovery");

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].execution_id, execution_id);
        assert_eq!(outcomes[0].previous_state, ExecutionState::Executing);
        assert_eq!(outcomes[0].action, RecoveryAction::FailedCleanChain);

        let reloaded = store.load_execution(&execution_id).expect("load").expect("present");
        assert_eq!(reloaded.state, ExecutionState::Failed);
        assert_eq!(reloaded.error.as_deref(), Some("recovered_after_crash"));
    }

    #[test]
    fn terminal_executions_are_left_alone() {
        let store = InMemoryStore::new();
        let execution = sample_execution(ExecutionState::Completed);
        store.save_execution(&execution).expect("save");

        let outcomes =
            recover_crashed_executions(&store, &HashSet::new(), || "2026-01-02T00:00:00Z".to_owned())
                .expect("recovery");
        assert!(outcomes.is_empty());
    }

    #[test]
    fn resume_set_skips_auto_fail() {
        let store = InMemoryStore::new();
        let execution = sample_execution(ExecutionState::AwaitingApproval);
        let execution_id = execution.execution_id.clone();
        store.save_execution(&execution).expect("save");

        let mut resume = HashSet::new();
        resume.insert(execution_id.clone());

        let outcomes = recover_crashed_executions(&store, &resume, || "2026-01-02T00:00:00Z".to_owned())
            .expect("recovery");

        assert_eq!(outcomes[0].action, RecoveryAction::LeftForResume);
        let reloaded = store.load_execution(&execution_id).expect("load").expect("present");
        assert_eq!(reloaded.state, ExecutionState::AwaitingApproval);
    }

    #[test]
    fn corrupt_audit_chain_is_recorded_but_still_fails_the_execution() {
        let store = InMemoryStore::new();
        let execution = sample_execution(ExecutionState::Executing);
        let execution_id = execution.execution_id.clone();
        store.save_execution(&execution).expect("save");

        let mut chain = AuditChain::new();
        chain
            .append(execution_id.clone(), "t0", AuditKind::System, serde_json::json!({"a": 1}))
            .expect("append");
        let mut entries = chain.entries().to_vec();
        entries[0].entry_hash = "tampered".to_owned();
        store.append_audit_entries(&entries).expect("append");

        let outcomes =
            recover_crashed_executions(&store, &HashSet::new(), || "2026-01-02T00:00:00Z".to_owned())
                .expect("recovery");

        assert!(matches!(outcomes[0].action, RecoveryAction::FailedCorruptChain(_)));
        let reloaded = store.load_execution(&execution_id).expect("load").expect("present");
        assert_eq!(reloaded.state, ExecutionState::Failed);
    }
}
