// crates/runbook-core/src/approval.rs
// ============================================================================
// Module: Approval Gate
// Description: Races a human prompt against a timeout for write actions
//              gated by policy (§3 ApprovalQueueEntry, §4.6 component H).
// Purpose: Give the orchestrator a single blocking call with deterministic
//          timeout semantics, independent of whatever UI asks the human.
// Dependencies: runbook-core::identifiers
// ============================================================================

//! The prompt itself is caller-supplied as a boxed closure so this module
//! never depends on a terminal, a queue table, or a webhook — the same
//! shape as the teacher's writer-thread designs, where the thing racing
//! the timeout is opaque to the gate (§4.6 "promptFn is supplied by the
//! caller; the gate does not know whether it is a CLI prompt, a queued
//! approval-queue row, or a test stub").

use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;

use crate::identifiers::RequestId;

/// What to do when no human decision arrives before the timeout (§4.6
/// "Timeout behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutBehavior {
    /// Treat the execution as failed; no further steps run.
    Halt,
    /// Skip the gated step and continue with the rest of the runbook.
    Skip,
    /// Treat the gated step as approved automatically.
    AutoApprove,
}

/// Configuration for a single [`ApprovalGate::request`] call (§4.6, §9
/// "Configuration objects").
#[derive(Debug, Clone, Copy)]
pub struct ApprovalOptions {
    /// How long to wait for a decision before applying `on_timeout`.
    pub timeout: Duration,
    /// What happens if no decision arrives in time.
    pub on_timeout: TimeoutBehavior,
}

impl Default for ApprovalOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            on_timeout: TimeoutBehavior::Halt,
        }
    }
}

/// The details shown to whoever (or whatever) decides an approval request
/// (§3 ApprovalQueueEntry).
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// Identifies this request across the queue, audit log, and CLI.
    pub request_id: RequestId,
    /// Human-readable summary of the step awaiting approval.
    pub summary: String,
    /// The simulated result, when the gate is reached in L2 mode.
    pub simulation_result: serde_json::Value,
}

/// A decision returned by a prompt function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalResponse {
    /// `true` if approved, `false` if denied.
    pub approved: bool,
    /// The human who decided, when known.
    pub approver: Option<String>,
    /// An optional free-text reason, typically required for denials.
    pub reason: Option<String>,
}

/// A non-timeout failure from a prompt function (the human interface
/// itself broke, not merely "no answer yet").
#[derive(Debug, Clone, thiserror::Error)]
#[error("approval prompt failed: {0}")]
pub struct ApprovalPromptError(pub String);

/// How an [`ApprovalGate::request`] call resolved (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// A human approved before the timeout.
    Approved,
    /// A human denied before the timeout.
    Denied,
    /// No decision arrived; [`TimeoutBehavior::Halt`] applied.
    TimedOutHalt,
    /// No decision arrived; [`TimeoutBehavior::Skip`] applied.
    TimedOutSkip,
    /// No decision arrived; [`TimeoutBehavior::AutoApprove`] applied.
    TimedOutAutoApproved,
}

impl ApprovalOutcome {
    /// Whether the gated step should proceed to execution.
    #[must_use]
    pub const fn proceeds(self) -> bool {
        matches!(self, Self::Approved | Self::TimedOutAutoApproved)
    }

    /// Whether the gated step should be marked skipped rather than
    /// executed or failed (§3 StepResult "expired-skip" resolution).
    #[must_use]
    pub const fn is_skip(self) -> bool {
        matches!(self, Self::TimedOutSkip)
    }
}

/// A fully-resolved approval decision, ready to fold into a [`crate::execution::ApprovalRecord`].
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    /// How the request resolved.
    pub outcome: ApprovalOutcome,
    /// The human who decided, when a decision (not a timeout) occurred.
    pub approver: Option<String>,
    /// The stated reason, when supplied.
    pub reason: Option<String>,
    /// Wall-clock time spent waiting for a decision.
    pub duration: Duration,
}

/// Races a caller-supplied prompt function against a timeout (§4.6).
///
/// The prompt runs on a dedicated thread; the calling thread blocks on
/// [`mpsc::Receiver::recv_timeout`], mirroring the writer-thread pattern
/// used elsewhere in this workspace for bounding a blocking call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApprovalGate;

impl ApprovalGate {
    /// Creates a gate. Stateless: every call is independent.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Requests approval for `request`, invoking `prompt` on a separate
    /// thread and racing it against `options.timeout`.
    ///
    /// # Errors
    ///
    /// Returns the [`ApprovalPromptError`] raised by `prompt` itself (a
    /// failure of the human interface, not an absence of a decision).
    /// A timeout is never an error — see [`TimeoutBehavior`].
    pub fn request<F>(
        &self,
        request: &ApprovalRequest,
        prompt: F,
        options: ApprovalOptions,
    ) -> Result<ApprovalDecision, ApprovalPromptError>
    where
        F: FnOnce(&ApprovalRequest) -> Result<ApprovalResponse, ApprovalPromptError> + Send + 'static,
    {
        let start = Instant::now();
        let (tx, rx) = mpsc::channel();
        let request_for_thread = request.clone();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let outcome = prompt(&request_for_thread);
                let _ = tx.send(outcome);
            });

            match rx.recv_timeout(options.timeout) {
                Ok(Ok(response)) => Ok(ApprovalDecision {
                    outcome: if response.approved {
                        ApprovalOutcome::Approved
                    } else {
                        ApprovalOutcome::Denied
                    },
                    approver: response.approver,
                    reason: response.reason,
                    duration: start.elapsed(),
                }),
                Ok(Err(err)) => Err(err),
                Err(mpsc::RecvTimeoutError::Timeout | mpsc::RecvTimeoutError::Disconnected) => {
                    Ok(Self::timeout_decision(options.on_timeout, start.elapsed()))
                }
            }
        })
    }

    fn timeout_decision(behavior: TimeoutBehavior, duration: Duration) -> ApprovalDecision {
        let outcome = match behavior {
            TimeoutBehavior::Halt => ApprovalOutcome::TimedOutHalt,
            TimeoutBehavior::Skip => ApprovalOutcome::TimedOutSkip,
            TimeoutBehavior::AutoApprove => ApprovalOutcome::TimedOutAutoApproved,
        };
        ApprovalDecision {
            outcome,
            approver: None,
            reason: None,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            request_id: RequestId::new(),
            summary: "isolate host web-01".to_owned(),
            simulation_result: serde_json::json!({}),
        }
    }

    #[test]
    fn approval_before_timeout_returns_approved() {
        let gate = ApprovalGate::new();
        let decision = gate
            .request(
                &request(),
                |_| {
                    Ok(ApprovalResponse {
                        approved: true,
                        approver: Some("alice".to_owned()),
                        reason: None,
                    })
                },
                ApprovalOptions { timeout: Duration::from_secs(5), on_timeout: TimeoutBehavior::Halt },
            )
            .expect("no prompt error");
        assert_eq!(decision.outcome, ApprovalOutcome::Approved);
        assert!(decision.outcome.proceeds());
        assert_eq!(decision.approver.as_deref(), Some("alice"));
    }

    #[test]
    fn denial_before_timeout_returns_denied() {
        let gate = ApprovalGate::new();
        let decision = gate
            .request(
                &request(),
                |_| {
                    Ok(ApprovalResponse {
                        approved: false,
                        approver: Some("bob".to_owned()),
                        reason: Some("too risky".to_owned()),
                    })
                },
                ApprovalOptions::default(),
            )
            .expect("no prompt error");
        assert_eq!(decision.outcome, ApprovalOutcome::Denied);
        assert!(!decision.outcome.proceeds());
    }

    #[test]
    fn timeout_with_halt_behavior_does_not_proceed() {
        let gate = ApprovalGate::new();
        let decision = gate
            .request(
                &request(),
                |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(ApprovalResponse { approved: true, approver: None, reason: None })
                },
                ApprovalOptions { timeout: Duration::from_millis(5), on_timeout: TimeoutBehavior::Halt },
            )
            .expect("no prompt error");
        assert_eq!(decision.outcome, ApprovalOutcome::TimedOutHalt);
        assert!(!decision.outcome.proceeds());
        assert!(!decision.outcome.is_skip());
    }

    #[test]
    fn timeout_with_skip_behavior_marks_skip() {
        let gate = ApprovalGate::new();
        let decision = gate
            .request(
                &request(),
                |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(ApprovalResponse { approved: true, approver: None, reason: None })
                },
                ApprovalOptions { timeout: Duration::from_millis(5), on_timeout: TimeoutBehavior::Skip },
            )
            .expect("no prompt error");
        assert_eq!(decision.outcome, ApprovalOutcome::TimedOutSkip);
        assert!(decision.outcome.is_skip());
        assert!(!decision.outcome.proceeds());
    }

    #[test]
    fn timeout_with_auto_approve_behavior_proceeds() {
        let gate = ApprovalGate::new();
        let decision = gate
            .request(
                &request(),
                |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(ApprovalResponse { approved: false, approver: None, reason: None })
                },
                ApprovalOptions { timeout: Duration::from_millis(5), on_timeout: TimeoutBehavior::AutoApprove },
            )
            .expect("no prompt error");
        assert_eq!(decision.outcome, ApprovalOutcome::TimedOutAutoApproved);
        assert!(decision.outcome.proceeds());
    }

    #[test]
    fn prompt_error_is_propagated_not_treated_as_timeout() {
        let gate = ApprovalGate::new();
        let err = gate
            .request(
                &request(),
                |_| Err(ApprovalPromptError("queue unavailable".to_owned())),
                ApprovalOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.0, "queue unavailable");
    }

    #[test]
    fn fast_decision_reports_a_small_duration() {
        let gate = ApprovalGate::new();
        let decision = gate
            .request(
                &request(),
                |_| Ok(ApprovalResponse { approved: true, approver: None, reason: None }),
                ApprovalOptions { timeout: Duration::from_secs(5), on_timeout: TimeoutBehavior::Halt },
            )
            .expect("no prompt error");
        assert!(decision.duration < Duration::from_secs(1));
    }
}
