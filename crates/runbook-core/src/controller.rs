// crates/runbook-core/src/controller.rs
// ============================================================================
// Module: Execution Controller
// Description: Tracks running executions, their execution-wide timeout
//              deadlines, and cooperative cancellation (§4.9 step 4, §5
//              "Cancellation", "Timeouts", component J).
// Purpose: Give the orchestrator one shared place to ask "has this run been
//          cancelled or timed out?" between steps and between retries.
// Dependencies: runbook-core::identifiers
// ============================================================================

//! Cancellation here is cooperative, not preemptive: [`ExecutionController`]
//! only flips a flag and records a deadline. The orchestrator is
//! responsible for consulting [`ExecutionController::should_abort`]
//! between steps and between retry attempts (§5 "Step executors consult
//! it between steps and between retry attempts"); in-flight adapter I/O
//! is bounded separately by the per-step timeout in
//! [`crate::executor`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::identifiers::ExecutionId;

/// Why a running execution should stop, as observed by
/// [`ExecutionController::should_abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A caller explicitly requested cancellation.
    Cancelled,
    /// The execution's `max_execution_time` deadline has passed.
    TimedOut,
}

struct ControllerEntry {
    deadline: Instant,
    cancelled: bool,
}

/// Tracks every currently-running execution's deadline and cancellation
/// flag (§4.9 step 4, component J).
///
/// A single controller is shared across every execution the engine is
/// running; each execution registers itself on start and deregisters on
/// reaching a terminal state, mirroring the "process-wide singleton with
/// explicit init/teardown" pattern called for in §9 for engine-wide
/// shared state.
#[derive(Default)]
pub struct ExecutionController {
    entries: Mutex<HashMap<ExecutionId, ControllerEntry>>,
}

impl ExecutionController {
    /// Creates a controller tracking no executions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `execution_id` as running, with a deadline `max_duration`
    /// from now (§3 `Runbook.config.max_execution_time`).
    pub fn register(&self, execution_id: ExecutionId, max_duration: Duration) {
        let mut entries = self.lock();
        entries.insert(
            execution_id,
            ControllerEntry {
                deadline: Instant::now() + max_duration,
                cancelled: false,
            },
        );
    }

    /// Removes `execution_id` from tracking. Called once the execution
    /// reaches a terminal state; a deregistered execution is no longer
    /// visible to [`Self::list_active`].
    pub fn deregister(&self, execution_id: &ExecutionId) {
        self.lock().remove(execution_id);
    }

    /// Requests cancellation of `execution_id`. Has no effect if the
    /// execution is not currently registered (already terminal).
    pub fn cancel(&self, execution_id: &ExecutionId) {
        if let Some(entry) = self.lock().get_mut(execution_id) {
            entry.cancelled = true;
        }
    }

    /// Checks whether `execution_id` should abort: either cancelled
    /// explicitly, or its execution-wide deadline has passed (§5
    /// "Timeouts" — "the first to fire wins").
    ///
    /// Returns `None` when the execution is not registered (nothing to
    /// abort) or has not been asked to stop.
    #[must_use]
    pub fn should_abort(&self, execution_id: &ExecutionId) -> Option<AbortReason> {
        let entries = self.lock();
        let entry = entries.get(execution_id)?;
        if entry.cancelled {
            Some(AbortReason::Cancelled)
        } else if Instant::now() >= entry.deadline {
            Some(AbortReason::TimedOut)
        } else {
            None
        }
    }

    /// Returns every execution id currently registered (§9 "a suspended
    /// execution still appears in `listActive`").
    #[must_use]
    pub fn list_active(&self) -> Vec<ExecutionId> {
        self.lock().keys().cloned().collect()
    }

    /// Removes every tracked execution. Test and shutdown affordance
    /// (§9 "Tests must be able to reset them").
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, ControllerEntry>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_execution_never_aborts() {
        let controller = ExecutionController::new();
        assert_eq!(controller.should_abort(&ExecutionId::new()), None);
    }

    #[test]
    fn registered_execution_does_not_abort_before_deadline_or_cancel() {
        let controller = ExecutionController::new();
        let id = ExecutionId::new();
        controller.register(id.clone(), Duration::from_secs(60));
        assert_eq!(controller.should_abort(&id), None);
    }

    #[test]
    fn cancel_marks_the_execution_for_abort() {
        let controller = ExecutionController::new();
        let id = ExecutionId::new();
        controller.register(id.clone(), Duration::from_secs(60));
        controller.cancel(&id);
        assert_eq!(controller.should_abort(&id), Some(AbortReason::Cancelled));
    }

    #[test]
    fn expired_deadline_reports_timed_out() {
        let controller = ExecutionController::new();
        let id = ExecutionId::new();
        controller.register(id.clone(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(controller.should_abort(&id), Some(AbortReason::TimedOut));
    }

    #[test]
    fn deregister_removes_the_execution_from_tracking() {
        let controller = ExecutionController::new();
        let id = ExecutionId::new();
        controller.register(id.clone(), Duration::from_secs(60));
        controller.deregister(&id);
        assert_eq!(controller.should_abort(&id), None);
        assert!(controller.list_active().is_empty());
    }

    #[test]
    fn list_active_reflects_registered_executions() {
        let controller = ExecutionController::new();
        let a = ExecutionId::new();
        let b = ExecutionId::new();
        controller.register(a.clone(), Duration::from_secs(60));
        controller.register(b.clone(), Duration::from_secs(60));
        let mut active = controller.list_active();
        active.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        let mut expected = vec![a, b];
        expected.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(active, expected);
    }

    #[test]
    fn reset_clears_every_tracked_execution() {
        let controller = ExecutionController::new();
        controller.register(ExecutionId::new(), Duration::from_secs(60));
        controller.register(ExecutionId::new(), Duration::from_secs(60));
        controller.reset();
        assert!(controller.list_active().is_empty());
    }
}
