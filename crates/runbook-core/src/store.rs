// crates/runbook-core/src/store.rs
// ============================================================================
// Module: Durable Store Contract
// Description: The persistence trait every durable backend implements (§6.4, component A).
// Purpose: Let the orchestrator's caller persist executions, audit entries,
//          approval-queue entries, and metrics without this crate depending
//          on any particular database.
// Dependencies: runbook-core::{audit, execution, identifiers, state_machine}
// ============================================================================

//! The core itself runs synchronously to completion and hands back a
//! finished [`crate::orchestrator::RunOutcome`]; it never talks to a
//! database directly (§1 "the core cares only about [the adapter]
//! contract" generalizes to persistence too — nothing in this crate is
//! wired to SQL). This trait is the seam `runbook-store-sqlite` implements,
//! mirroring the teacher's small `RunStateStore { load, save }` trait
//! generalized to the four logical tables in §6.4: executions, audit_log,
//! approval_queue, metrics.

use serde::Deserialize;
use serde::Serialize;

use crate::audit::AuditEntry;
use crate::execution::ApprovalQueueEntry;
use crate::execution::ApprovalQueueStatus;
use crate::execution::Execution;
use crate::identifiers::ExecutionId;
use crate::identifiers::RequestId;
use crate::identifiers::RunbookId;
use crate::state_machine::ExecutionState;

/// Errors a [`Store`] implementation may return. Deliberately backend-agnostic:
/// no SQL error variants leak through this trait.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage medium could not be reached or written.
    #[error("store io error: {0}")]
    Io(String),
    /// Data read back from storage failed an integrity check (e.g. the
    /// audit hash chain, §5 "Crash recovery").
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// A value could not be (de)serialized to its persisted form.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// The caller referenced a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl crate::errors::StableError for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io",
            Self::Corrupt(_) => "store_corrupt",
            Self::Invalid(_) => "store_invalid",
            Self::NotFound(_) => "store_not_found",
        }
    }

    fn component(&self) -> crate::errors::Component {
        crate::errors::Component::Engine
    }
}

/// Filter applied to [`Store::list_executions`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    /// Restrict to executions of this runbook.
    pub runbook_id: Option<RunbookId>,
    /// Restrict to executions currently in this state.
    pub state: Option<ExecutionState>,
    /// Maximum rows to return (store applies its own hard cap if `None`).
    pub limit: Option<usize>,
}

/// A single recorded metric sample (§6.4 `metrics` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric name, e.g. `"steps_total"`, `"approval_latency_ms"`.
    pub name: String,
    /// Numeric value.
    pub value: f64,
    /// Free-form tags (execution id, runbook id, action, ...).
    pub tags: serde_json::Value,
    /// ISO-8601 time the sample was recorded.
    pub recorded_at: String,
}

/// The durable persistence contract (§6.4): `executions`, `audit_log`,
/// `approval_queue`, `metrics`. Implementations must serialize writes per
/// execution row and append to the audit log atomically with the owning
/// state transition (§5 "Shared resources"); the audit table must reject
/// updates and deletes (§6.4).
pub trait Store: Send + Sync {
    /// Inserts or replaces an execution row, keyed by `execution_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Loads a single execution by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn load_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError>;

    /// Lists executions matching `filter`, most recently started first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError>;

    /// Returns every execution currently in a non-terminal state (§5
    /// "Crash recovery": loaded at startup and transitioned to `failed`
    /// unless a resume command is issued).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn non_terminal_executions(&self) -> Result<Vec<Execution>, StoreError>;

    /// Appends `entries` to the audit log. Implementations must reject
    /// attempts to overwrite an existing `(execution_id, sequence)` pair
    /// (§6.4 "the audit table must reject updates/deletes").
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any entry cannot be appended, or if an
    /// entry's sequence/hash does not chain from the last persisted entry.
    fn append_audit_entries(&self, entries: &[AuditEntry]) -> Result<(), StoreError>;

    /// Loads the full audit chain for one execution, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn load_audit_entries(&self, execution_id: &ExecutionId) -> Result<Vec<AuditEntry>, StoreError>;

    /// Inserts or replaces an approval-queue entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save_queue_entry(&self, entry: &ApprovalQueueEntry) -> Result<(), StoreError>;

    /// Loads a single queue entry by request id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn load_queue_entry(&self, request_id: &RequestId) -> Result<Option<ApprovalQueueEntry>, StoreError>;

    /// Lists queue entries, optionally restricted to one status, ordered by
    /// `requested_at` (§6.4 index `(status, expires_at)`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn list_queue_entries(
        &self,
        status: Option<ApprovalQueueStatus>,
    ) -> Result<Vec<ApprovalQueueEntry>, StoreError>;

    /// Records one metric sample.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn record_metric(&self, point: &MetricPoint) -> Result<(), StoreError>;

    /// Returns every metric sample recorded in `[since, until)`, both
    /// ISO-8601 timestamps compared lexicographically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn metrics_window(&self, since: &str, until: &str) -> Result<Vec<MetricPoint>, StoreError>;
}

/// An in-memory [`Store`], used by tests and as a reference implementation
/// of the contract (the default store, see §9 "Global state": the default
/// registry/policy/config are explicit, resettable singletons; this type is
/// the in-process analogue for storage).
#[derive(Default)]
pub struct InMemoryStore {
    inner: std::sync::Mutex<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    executions: std::collections::BTreeMap<String, Execution>,
    audit: std::collections::BTreeMap<String, Vec<AuditEntry>>,
    queue: std::collections::BTreeMap<String, ApprovalQueueEntry>,
    metrics: Vec<MetricPoint>,
}

impl InMemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for InMemoryStore {
    fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.lock()
            .executions
            .insert(execution.execution_id.as_str().to_owned(), execution.clone());
        Ok(())
    }

    fn load_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self.lock().executions.get(execution_id.as_str()).cloned())
    }

    fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let guard = self.lock();
        let mut rows: Vec<Execution> = guard
            .executions
            .values()
            .filter(|e| filter.runbook_id.as_ref().is_none_or(|id| &e.runbook_id == id))
            .filter(|e| filter.state.is_none_or(|s| e.state == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn non_terminal_executions(&self) -> Result<Vec<Execution>, StoreError> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|e| !e.state.is_terminal())
            .cloned()
            .collect())
    }

    fn append_audit_entries(&self, entries: &[AuditEntry]) -> Result<(), StoreError> {
        let mut guard = self.lock();
        for entry in entries {
            let chain = guard.audit.entry(entry.execution_id.as_str().to_owned()).or_default();
            if chain.iter().any(|e| e.sequence == entry.sequence) {
                return Err(StoreError::Invalid(format!(
                    "audit entry sequence {} already recorded for execution {}",
                    entry.sequence, entry.execution_id
                )));
            }
            chain.push(entry.clone());
        }
        Ok(())
    }

    fn load_audit_entries(&self, execution_id: &ExecutionId) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.lock().audit.get(execution_id.as_str()).cloned().unwrap_or_default())
    }

    fn save_queue_entry(&self, entry: &ApprovalQueueEntry) -> Result<(), StoreError> {
        self.lock().queue.insert(entry.request_id.as_str().to_owned(), entry.clone());
        Ok(())
    }

    fn load_queue_entry(&self, request_id: &RequestId) -> Result<Option<ApprovalQueueEntry>, StoreError> {
        Ok(self.lock().queue.get(request_id.as_str()).cloned())
    }

    fn list_queue_entries(
        &self,
        status: Option<ApprovalQueueStatus>,
    ) -> Result<Vec<ApprovalQueueEntry>, StoreError> {
        let guard = self.lock();
        let mut rows: Vec<ApprovalQueueEntry> = guard
            .queue
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(rows)
    }

    fn record_metric(&self, point: &MetricPoint) -> Result<(), StoreError> {
        self.lock().metrics.push(point.clone());
        Ok(())
    }

    fn metrics_window(&self, since: &str, until: &str) -> Result<Vec<MetricPoint>, StoreError> {
        Ok(self
            .lock()
            .metrics
            .iter()
            .filter(|m| m.recorded_at.as_str() >= since && m.recorded_at.as_str() < until)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::runbook::ExecutionMode;
    use std::collections::HashMap;

    fn sample_execution() -> Execution {
        let ctx = ExecutionContext::new(serde_json::json!({}), HashMap::new());
        Execution::new(
            RunbookId::new("3fa85f64-5717-4562-b3fc-2c963f66afa6"),
            "1.0.0",
            "Isolate and Notify",
            ExecutionMode::Production,
            ctx,
            "2026-01-01T00:00:00Z",
        )
    }

    #[test]
    fn round_trips_an_execution() {
        let store = InMemoryStore::new();
        let execution = sample_execution();
        store.save_execution(&execution).expect("save");
        let loaded = store.load_execution(&execution.execution_id).expect("load");
        assert_eq!(loaded, Some(execution));
    }

    #[test]
    fn non_terminal_executions_excludes_completed_rows() {
        let store = InMemoryStore::new();
        let mut execution = sample_execution();
        store.save_execution(&execution).expect("save");
        assert_eq!(store.non_terminal_executions().expect("list").len(), 1);

        execution.state = ExecutionState::Completed;
        store.save_execution(&execution).expect("save");
        assert_eq!(store.non_terminal_executions().expect("list").len(), 0);
    }

    #[test]
    fn duplicate_audit_sequence_is_rejected() {
        let store = InMemoryStore::new();
        let execution_id = ExecutionId::new();
        let entry = AuditEntry {
            sequence: 1,
            execution_id: execution_id.clone(),
            timestamp: "t0".to_owned(),
            kind: crate::audit::AuditKind::System,
            payload: serde_json::json!({}),
            prev_hash: crate::hashing::genesis_hash(),
            entry_hash: "deadbeef".to_owned(),
        };
        store.append_audit_entries(std::slice::from_ref(&entry)).expect("append");
        assert!(store.append_audit_entries(std::slice::from_ref(&entry)).is_err());
    }

    #[test]
    fn queue_entries_filter_by_status() {
        let store = InMemoryStore::new();
        let entry = ApprovalQueueEntry {
            request_id: RequestId::new(),
            execution_id: ExecutionId::new(),
            runbook_id: RunbookId::new("r1"),
            runbook_name: "name".to_owned(),
            step_id: crate::identifiers::StepId::from("step-01"),
            step_name: "step".to_owned(),
            executor: "mock-network".to_owned(),
            action: crate::action::Action::BlockIp,
            parameters: serde_json::Map::new(),
            simulation_result: serde_json::Value::Null,
            status: ApprovalQueueStatus::Pending,
            requested_at: "t0".to_owned(),
            expires_at: "t1".to_owned(),
            approver: None,
            approved_at: None,
            denial_reason: None,
        };
        store.save_queue_entry(&entry).expect("save");
        assert_eq!(store.list_queue_entries(Some(ApprovalQueueStatus::Pending)).expect("list").len(), 1);
        assert_eq!(store.list_queue_entries(Some(ApprovalQueueStatus::Approved)).expect("list").len(), 0);
    }
}
