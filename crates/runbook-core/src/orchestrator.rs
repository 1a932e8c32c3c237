// crates/runbook-core/src/orchestrator.rs
// ============================================================================
// Module: Orchestrator
// Description: Composes the loader, policy enforcer, state machine, step
//              executor, approval gate, and audit log into one alert-to-
//              execution run (§4.9, component K).
// Purpose: Give callers (webhook handler, CLI `run`, stdin ingestion) a
//          single blocking call that turns an alert into a finished Execution.
// Dependencies: runbook-core::{action, adapter, alert, approval, audit,
//               context, controller, execution, executor, identifiers,
//               policy, runbook, state_machine, templating}
// ============================================================================

//! This module is deliberately synchronous: concurrency within one run
//! (parallel step waves) and across runs (the engine-wide ceiling) both use
//! `std::thread`, matching the rest of this crate. Async I/O, where it
//! exists at all, lives at the ingestion edge, not here.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;

use serde_json::Value;

use crate::action::ActionClass;
use crate::adapter::AdapterRegistry;
use crate::alert::AlertEvent;
use crate::approval::ApprovalGate;
use crate::approval::ApprovalOptions;
use crate::approval::ApprovalPromptError;
use crate::approval::ApprovalRequest;
use crate::approval::ApprovalResponse;
use crate::audit::AuditChain;
use crate::audit::AuditKind;
use crate::context::ExecutionContext;
use crate::controller::AbortReason;
use crate::controller::ExecutionController;
use crate::execution::ApprovalQueueEntry;
use crate::execution::ApprovalQueueStatus;
use crate::execution::ApprovalRecord;
use crate::execution::Execution;
use crate::execution::StepResult;
use crate::executor::CircuitBreakerOptions;
use crate::executor::RetryOptions;
use crate::executor::StepExecutor;
use crate::identifiers::RunbookId;
use crate::identifiers::StepId;
use crate::policy::AutomationPolicy;
use crate::policy::PolicyCheckResult;
use crate::policy::Violation;
use crate::runbook::AutomationLevel;
use crate::runbook::ExecutionMode;
use crate::runbook::Runbook;
use crate::runbook::Step;
use crate::state_machine;
use crate::state_machine::ExecutionState;
use crate::state_machine::TransitionError;
use crate::templating;

/// A synchronous approval prompt, shared across steps within one run.
///
/// `Arc`-wrapped (rather than a plain `&dyn Fn`) because
/// [`ApprovalGate::request`] moves its prompt onto a dedicated decision
/// thread and requires `'static`; an `Arc` clone satisfies that without the
/// caller needing to leak or statically allocate anything.
pub type ApprovalPrompt =
    Arc<dyn Fn(&ApprovalRequest) -> Result<ApprovalResponse, ApprovalPromptError> + Send + Sync>;

/// How to resolve which runbook a run executes (§4.9 step 1).
#[derive(Debug, Clone)]
pub enum RunbookSelector {
    /// The caller already knows which runbook to run.
    Explicit(RunbookId),
    /// Resolve by matching the alert's ATT&CK techniques against each
    /// candidate's `triggers.mitre_technique`, optionally informed by an
    /// advisory suggestion from the LLM summarizer.
    AutoDetect {
        /// A runbook id the (out-of-process) LLM suggester proposed. Never
        /// trusted on its own — only used to shortlist a candidate when no
        /// unique technique match exists, and still subject to
        /// confirmation.
        llm_suggestion: Option<RunbookId>,
    },
}

/// A resolution outcome that needs a human (or calling CLI/webhook) to pick
/// one of several candidates before a run can proceed (§4.9 step 1 "selection
/// requires human confirmation unless a unique technique match exists").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// `RunbookSelector::Explicit` named an id not present among the
    /// supplied candidates.
    #[error("no candidate runbook with id {0}")]
    UnknownExplicitId(RunbookId),
    /// Neither a technique match nor an LLM suggestion produced any
    /// candidate.
    #[error("no runbook matched the alert's ATT&CK techniques")]
    NoCandidate,
    /// More than one candidate is plausible and no confirmation callback
    /// was supplied to pick one.
    #[error("ambiguous runbook match requires confirmation: {0:?}")]
    ConfirmationRequired(Vec<RunbookId>),
    /// A confirmation callback was supplied but declined every candidate.
    #[error("runbook selection was declined")]
    ConfirmationDeclined,
}

/// Resolves which runbook id a run should execute (§4.9 step 1).
///
/// # Errors
///
/// See [`ResolutionError`].
pub fn resolve_runbook_id(
    alert: &AlertEvent,
    candidates: &[Runbook],
    selector: &RunbookSelector,
    confirm: Option<&dyn Fn(&[RunbookId]) -> Option<RunbookId>>,
) -> Result<RunbookId, ResolutionError> {
    match selector {
        RunbookSelector::Explicit(id) => {
            if candidates.iter().any(|r| &r.id == id) {
                Ok(id.clone())
            } else {
                Err(ResolutionError::UnknownExplicitId(id.clone()))
            }
        }
        RunbookSelector::AutoDetect { llm_suggestion } => {
            let techniques: HashSet<&str> = alert.technique_ids().into_iter().collect();
            let matches: Vec<&Runbook> = candidates
                .iter()
                .filter(|r| r.triggers.mitre_technique.iter().any(|t| techniques.contains(t.as_str())))
                .collect();

            if matches.len() == 1 {
                return Ok(matches[0].id.clone());
            }

            let proposals: Vec<RunbookId> = if !matches.is_empty() {
                matches.iter().map(|r| r.id.clone()).collect()
            } else if let Some(suggestion) = llm_suggestion {
                if candidates.iter().any(|r| &r.id == suggestion) {
                    vec![suggestion.clone()]
                } else {
                    return Err(ResolutionError::NoCandidate);
                }
            } else {
                return Err(ResolutionError::NoCandidate);
            };

            match confirm {
                Some(confirm) => confirm(&proposals).ok_or(ResolutionError::ConfirmationDeclined),
                None => Err(ResolutionError::ConfirmationRequired(proposals)),
            }
        }
    }
}

/// Options for a single [`run`] call (§4.9 "options {mode, level, enable_l2, admin, timeout_ms}").
#[derive(Clone)]
pub struct OrchestratorOptions {
    /// The execution mode requested for non-L2-simulated steps.
    pub mode: ExecutionMode,
    /// The automation level this run executes under.
    pub level: AutomationLevel,
    /// Explicit opt-in required for `level = L2` (§4.3).
    pub enable_l2: bool,
    /// Whether the requester is an admin (enables policy overrides).
    pub admin: bool,
    /// Risk score attached to this run, if the caller computed one.
    pub risk_score: Option<u8>,
    /// Timeout behavior and duration for the synchronous approval gate.
    pub approval: ApprovalOptions,
    /// Retry policy applied to production-mode adapter calls.
    pub retry: RetryOptions,
    /// Circuit-breaker policy applied per adapter.
    pub breaker: CircuitBreakerOptions,
    /// Engine-wide ceiling on concurrently dispatching steps, across every
    /// wave of this run (§5 "an additional process-wide ceiling").
    pub max_concurrent_steps: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Production,
            level: AutomationLevel::L0,
            enable_l2: false,
            admin: false,
            risk_score: None,
            approval: ApprovalOptions::default(),
            retry: RetryOptions::default(),
            breaker: CircuitBreakerOptions::default(),
            max_concurrent_steps: 8,
        }
    }
}

/// A rollback attempt made against a single previously-completed step (§4.9 step 7).
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    /// The step whose effect this rollback attempted to reverse.
    pub step_id: StepId,
    /// Whether the rollback call itself succeeded.
    pub success: bool,
    /// Sanitized error message, present on failure.
    pub error: Option<String>,
}

/// Everything produced by one [`run`] call.
pub struct RunOutcome {
    /// The final execution record, including its terminal state.
    pub execution: Execution,
    /// Per-step results, in completion order.
    pub step_results: Vec<StepResult>,
    /// The hash-chained audit trail for this run.
    pub audit: AuditChain,
    /// Approval-queue entries generated by L2-simulated write steps.
    pub queue_entries: Vec<ApprovalQueueEntry>,
    /// Rollback attempts, if a halt-triggering failure ran one.
    pub rollback_log: Vec<RollbackOutcome>,
}

/// Failure that aborts a run before an [`Execution`] row even exists (§4.9
/// steps 1-2). Once an execution is created, failures are recorded *in* the
/// returned [`RunOutcome`] (a `failed` or `rolled_back` terminal state)
/// rather than as an `Err` here.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Runbook resolution failed (§4.9 step 1).
    #[error("runbook resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    /// The resolved runbook id was not actually present among the candidates
    /// (should not happen if [`resolve_runbook_id`] was used to produce it).
    #[error("resolved runbook {0} not found among candidates")]
    RunbookMissing(RunbookId),
    /// The resolved runbook failed one or more structural invariants (§4.1).
    #[error("playbook failed {} structural invariant(s)", .0.len())]
    InvalidRunbook(Vec<crate::runbook::RunbookInvariantError>),
    /// An internal state transition was illegal. Indicates a bug in this
    /// module's own transition sequencing, never a consequence of caller
    /// input.
    #[error(transparent)]
    StateMachine(#[from] TransitionError),
}

/// Runs one alert through to a finished execution (§4.9).
///
/// `candidates` are runbooks already loaded and validated by
/// [`crate::loader`]; this function re-checks structural invariants
/// defensively but does not parse YAML itself. `registry` must contain every
/// adapter named by any candidate's steps. `prompt` supplies the human
/// decision function for synchronous (non-L2) approval gates; `confirm`
/// resolves an ambiguous runbook match. Both may be `None` when the caller
/// knows neither situation can arise (e.g. an explicit runbook id and an L0
/// run).
///
/// # Errors
///
/// Returns [`OrchestratorError`] only for failures before an execution
/// record exists (resolution, load validation). Failures afterward
/// (disallowed policy, denied approval, step failure) are represented as a
/// terminal state on the returned [`RunOutcome::execution`].
#[allow(clippy::too_many_arguments)]
pub fn run(
    alert: &AlertEvent,
    candidates: &[Runbook],
    selector: RunbookSelector,
    context_vars: HashMap<String, Value>,
    options: OrchestratorOptions,
    registry: &AdapterRegistry,
    policy: &AutomationPolicy,
    controller: &ExecutionController,
    prompt: Option<ApprovalPrompt>,
    confirm: Option<&dyn Fn(&[RunbookId]) -> Option<RunbookId>>,
) -> Result<RunOutcome, OrchestratorError> {
    // Step 1: resolve the runbook.
    let runbook_id = resolve_runbook_id(alert, candidates, &selector, confirm)?;
    let runbook = candidates
        .iter()
        .find(|r| r.id == runbook_id)
        .ok_or_else(|| OrchestratorError::RunbookMissing(runbook_id.clone()))?;

    // Step 2: re-validate. The loader already checked this for anything
    // that reached us through it, but a defensively-constructed candidate
    // list (tests, a future in-memory registry) gets the same guarantee.
    let invariant_errors = runbook.check_invariants();
    if !invariant_errors.is_empty() {
        return Err(OrchestratorError::InvalidRunbook(invariant_errors));
    }

    // Step 3: build the execution context.
    let alert_value = serde_json::to_value(alert).unwrap_or(Value::Null);
    let context = ExecutionContext::new(alert_value, context_vars);

    // Step 4: persist (in-memory, here) the execution row, start the
    // controller timer, and open the audit chain.
    let mut execution = Execution::new(
        runbook.id.clone(),
        runbook.version.clone(),
        runbook.metadata.name.clone(),
        options.mode,
        context,
        now(),
    );
    let execution_id = execution.execution_id.clone();
    controller.register(
        execution_id.clone(),
        std::time::Duration::from_secs(u64::from(runbook.config.max_execution_time)),
    );

    let mut audit = AuditChain::new();
    let _ = audit.append(
        execution_id.clone(),
        now(),
        AuditKind::System,
        serde_json::json!({"event": "start", "runbook_id": runbook.id.as_str()}),
    );

    advance(&mut execution, &mut audit, ExecutionState::Planning, "resolved and validated")?;

    let outcome = run_inner(runbook, &mut execution, &mut audit, &options, registry, policy, controller, prompt.as_ref());

    controller.deregister(&execution_id);
    outcome
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn run_inner(
    runbook: &Runbook,
    execution: &mut Execution,
    audit: &mut AuditChain,
    options: &OrchestratorOptions,
    registry: &AdapterRegistry,
    policy: &AutomationPolicy,
    controller: &ExecutionController,
    prompt: Option<&ApprovalPrompt>,
) -> Result<RunOutcome, OrchestratorError> {
    let execution_id = execution.execution_id.clone();

    // Step 5: batch-validate policy, using each step's *effective* mode so
    // that an L2 write step (forced to simulation regardless of the run's
    // requested mode, see `effective_mode`) is never flagged by the
    // L2-production-write guard that exists to stop that same write from
    // reaching production (see DESIGN.md, "L2 batch validation mode").
    let mut policy_results: HashMap<StepId, PolicyCheckResult> = HashMap::new();
    let mut denials: Vec<(StepId, Vec<Violation>)> = Vec::new();
    if let Some(violation) = crate::policy::validate_l2_enabled(options.enable_l2, options.level) {
        for step in &runbook.steps {
            denials.push((step.id.clone(), vec![violation.clone()]));
        }
    } else {
        for step in &runbook.steps {
            let mode = effective_mode(step, options);
            let result = crate::policy::check_policy(
                step.action,
                options.level,
                mode,
                options.risk_score,
                options.admin,
                policy,
            );
            if !result.allowed {
                denials.push((step.id.clone(), result.violations.clone()));
            }
            policy_results.insert(step.id.clone(), result);
        }
    }

    if !denials.is_empty() {
        let _ = audit.append(
            execution_id.clone(),
            now(),
            AuditKind::System,
            serde_json::json!({"event": "policy_denied", "denials": denials.iter().map(|(id, v)| {
                serde_json::json!({"step_id": id.as_str(), "violations": v.iter().map(|v| v.code).collect::<Vec<_>>()})
            }).collect::<Vec<_>>()}),
        );
        advance(execution, audit, ExecutionState::Failed, "policy check denied one or more steps")?;
        execution.error = Some("one or more steps were denied by policy".to_owned());
        finalize(execution, now());
        return Ok(RunOutcome {
            execution: execution.clone(),
            step_results: Vec::new(),
            audit: audit.clone(),
            queue_entries: Vec::new(),
            rollback_log: Vec::new(),
        });
    }

    advance(execution, audit, ExecutionState::Executing, "policy check passed")?;

    // Step 6: compute execution order respecting depends_on.
    let waves = execution_waves(&runbook.steps);

    let executor = StepExecutor::new(options.retry, options.breaker);
    let ceiling = Semaphore::new(options.max_concurrent_steps.max(1));

    let mut step_results: Vec<StepResult> = Vec::new();
    let mut queue_entries: Vec<ApprovalQueueEntry> = Vec::new();
    let mut completed_steps: Vec<Step> = Vec::new();
    let mut halted = false;
    let mut abort_reason: Option<AbortReason> = None;

    'waves: for wave in waves {
        if let Some(reason) = controller.should_abort(&execution_id) {
            abort_reason = Some(reason);
            break 'waves;
        }

        let run_one = |step: &Step| -> StepOutcomeOrGate {
            run_single_step(
                step,
                execution,
                &executor,
                registry,
                policy_results.get(&step.id),
                options,
                prompt,
            )
        };

        if runbook.config.parallel_execution && wave.len() > 1 {
            let results: Vec<StepOutcomeOrGate> = std::thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|step| {
                        let permit = ceiling.acquire();
                        scope.spawn(move || {
                            let outcome = run_one(step);
                            drop(permit);
                            outcome
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or(StepOutcomeOrGate::Panicked))
                    .collect()
            });
            for (step, result) in wave.iter().zip(results) {
                if !apply_step_outcome(
                    step,
                    result,
                    execution,
                    audit,
                    &mut step_results,
                    &mut queue_entries,
                    &mut completed_steps,
                ) {
                    halted = true;
                    break 'waves;
                }
            }
        } else {
            for step in wave {
                if let Some(reason) = controller.should_abort(&execution_id) {
                    abort_reason = Some(reason);
                    break 'waves;
                }
                let result = run_one(step);
                if !apply_step_outcome(
                    step,
                    result,
                    execution,
                    audit,
                    &mut step_results,
                    &mut queue_entries,
                    &mut completed_steps,
                ) {
                    halted = true;
                    break 'waves;
                }
            }
        }
    }

    let mut rollback_log = Vec::new();

    if let Some(reason) = abort_reason {
        let kind = match reason {
            AbortReason::Cancelled => ExecutionState::Cancelled,
            AbortReason::TimedOut => ExecutionState::TimedOut,
        };
        advance(execution, audit, kind, "execution controller requested abort")?;
    } else if halted {
        let should_rollback = runbook.config.rollback_on_failure && !completed_steps.is_empty();
        if should_rollback {
            let _ = audit.append(execution_id.clone(), now(), AuditKind::RollbackStart, serde_json::json!({}));
            rollback_log = run_rollback(&completed_steps, execution, registry, audit);
            let _ = audit.append(
                execution_id.clone(),
                now(),
                AuditKind::RollbackComplete,
                serde_json::json!({"attempted": rollback_log.len()}),
            );
            advance(execution, audit, ExecutionState::Failed, "halting failure")?;
            advance(execution, audit, ExecutionState::RolledBack, "rollback sequence completed")?;
        } else {
            advance(execution, audit, ExecutionState::Failed, "halting failure")?;
        }
        execution.error.get_or_insert_with(|| "execution halted on step failure".to_owned());
    } else {
        advance(execution, audit, ExecutionState::Completed, "all steps finished")?;
    }

    finalize(execution, now());

    Ok(RunOutcome {
        execution: execution.clone(),
        step_results,
        audit: audit.clone(),
        queue_entries,
        rollback_log,
    })
}

/// Outcome of dispatching one step, already folded into the shapes the
/// caller-loop branch needs, so thread-spawned closures stay `'static`-free
/// (they borrow only `&Step`/shared `&` references, never `execution`).
enum StepOutcomeOrGate {
    /// The step ran (possibly in simulation) and produced a result.
    Ran {
        result: StepResult,
        published_output: Value,
    },
    /// An L2 write step was simulated and queued rather than run for real.
    Queued {
        entry: ApprovalQueueEntry,
        result: StepResult,
    },
    /// The synchronous approval gate resolved to something other than
    /// "proceed": denial, halt-timeout, skip-timeout.
    Gated { result: StepResult, halt: bool },
    /// The step could not even be dispatched (unknown executor, bad template).
    DispatchFailed { result: StepResult },
    /// The worker thread running this step panicked.
    Panicked,
}

#[allow(clippy::too_many_arguments)]
fn run_single_step(
    step: &Step,
    execution: &Execution,
    executor: &StepExecutor,
    registry: &AdapterRegistry,
    policy_result: Option<&PolicyCheckResult>,
    options: &OrchestratorOptions,
    prompt: Option<&ApprovalPrompt>,
) -> StepOutcomeOrGate {
    let ctx = &execution.context;
    let mode = effective_mode(step, options);
    let requires_approval = policy_result.is_some_and(|r| r.requires_approval);

    // Step 7a: L2 write steps are always simulated and queued, never
    // dispatched for real, and never pass through the synchronous gate.
    if options.level == AutomationLevel::L2 && step.action.class() == ActionClass::Write {
        return match executor.run(step, ctx, ExecutionMode::Simulation, registry, now()) {
            Ok(outcome) => {
                let expires_at = now();
                let entry = ApprovalQueueEntry {
                    request_id: crate::identifiers::RequestId::new(),
                    execution_id: execution.execution_id.clone(),
                    runbook_id: execution.runbook_id.clone(),
                    runbook_name: execution.runbook_name.clone(),
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    executor: step.executor.clone(),
                    action: step.action,
                    parameters: step.parameters.clone(),
                    simulation_result: outcome.result.output.clone(),
                    status: ApprovalQueueStatus::Pending,
                    requested_at: now(),
                    expires_at,
                    approver: None,
                    approved_at: None,
                    denial_reason: None,
                };
                StepOutcomeOrGate::Queued {
                    entry,
                    result: outcome.result,
                }
            }
            Err(_) => StepOutcomeOrGate::DispatchFailed {
                result: dispatch_failed_result(step),
            },
        };
    }

    // Step 7b: a write step under a synchronous approval gate.
    if requires_approval
        && options.level >= AutomationLevel::L1
        && mode == ExecutionMode::Production
        && step.action.class() == ActionClass::Write
    {
        let Some(prompt) = prompt else {
            return StepOutcomeOrGate::Gated {
                result: gated_result(step, "no approval prompt configured", true),
                halt: true,
            };
        };
        let gate = ApprovalGate::new();
        let request = ApprovalRequest {
            request_id: crate::identifiers::RequestId::new(),
            summary: format!("{} on {}", step.action, step.executor),
            simulation_result: Value::Null,
        };
        let decision = gate.request(&request, |r| prompt(r), options.approval);
        return match decision {
            Err(err) => StepOutcomeOrGate::Gated {
                result: gated_result(step, &err.0, true),
                halt: true,
            },
            Ok(decision) => {
                let record = ApprovalRecord {
                    request_id: None,
                    status: approval_status_label(decision.outcome).to_owned(),
                    approver: decision.approver.clone(),
                    reason: decision.reason.clone(),
                    responded_at: now(),
                    duration_ms: u64::try_from(decision.duration.as_millis()).unwrap_or(u64::MAX),
                };
                if decision.outcome.is_skip() {
                    StepOutcomeOrGate::Gated {
                        result: skipped_result(step, record),
                        halt: false,
                    }
                } else if decision.outcome.proceeds() {
                    match executor.run(step, ctx, mode, registry, now()) {
                        Ok(mut outcome) => {
                            outcome.result.approval = Some(record);
                            let published = outcome.result.output.clone();
                            StepOutcomeOrGate::Ran {
                                result: outcome.result,
                                published_output: published,
                            }
                        }
                        Err(_) => StepOutcomeOrGate::DispatchFailed {
                            result: dispatch_failed_result(step),
                        },
                    }
                } else {
                    StepOutcomeOrGate::Gated {
                        result: denied_result(step, decision.outcome, record),
                        halt: true,
                    }
                }
            }
        };
    }

    // Step 7c: plain dispatch.
    match executor.run(step, ctx, mode, registry, now()) {
        Ok(outcome) => {
            let published = outcome.result.output.clone();
            StepOutcomeOrGate::Ran {
                result: outcome.result,
                published_output: published,
            }
        }
        Err(_) => StepOutcomeOrGate::DispatchFailed {
            result: dispatch_failed_result(step),
        },
    }
}

/// Folds a [`StepOutcomeOrGate`] into the running execution: publishes
/// output to the context, appends the result, appends audit entries, and
/// reports whether the run should continue to the next step (`false` means
/// halt).
fn apply_step_outcome(
    step: &Step,
    outcome: StepOutcomeOrGate,
    execution: &mut Execution,
    audit: &mut AuditChain,
    step_results: &mut Vec<StepResult>,
    queue_entries: &mut Vec<ApprovalQueueEntry>,
    completed_steps: &mut Vec<Step>,
) -> bool {
    let execution_id = execution.execution_id.clone();
    let _ = audit.append(
        execution_id.clone(),
        now(),
        AuditKind::StepStart,
        serde_json::json!({"step_id": step.id.as_str(), "action": step.action.as_str()}),
    );

    let proceed = match outcome {
        StepOutcomeOrGate::Ran { result, published_output } => {
            execution.context = execution.context.with_step_output(step.id.as_str(), published_output);
            let success = result.success;
            if success {
                completed_steps.push(step.clone());
                step_results.push(result);
                true
            } else if step.on_error == crate::runbook::OnError::Skip {
                step_results.push(skipped_from_failure(step));
                true
            } else {
                step_results.push(result);
                step.on_error != crate::runbook::OnError::Halt
            }
        }
        StepOutcomeOrGate::Queued { entry, result } => {
            queue_entries.push(entry);
            step_results.push(result);
            true
        }
        StepOutcomeOrGate::Gated { result, halt } => {
            step_results.push(result);
            !halt
        }
        StepOutcomeOrGate::DispatchFailed { result } => {
            if step.on_error == crate::runbook::OnError::Skip {
                step_results.push(skipped_from_failure(step));
                true
            } else {
                step_results.push(result);
                step.on_error != crate::runbook::OnError::Halt
            }
        }
        StepOutcomeOrGate::Panicked => {
            step_results.push(dispatch_failed_result(step));
            false
        }
    };

    if !proceed {
        if let Some(message) = step_results.last().and_then(|r| r.error.as_ref()).map(|e| e.message.clone()) {
            execution.error.get_or_insert(message);
        }
    }

    if let Some(record) = step_results.last().and_then(|r| r.approval.as_ref()) {
        let _ = audit.append(
            execution_id.clone(),
            now(),
            AuditKind::ApprovalDecision,
            serde_json::json!({
                "step_id": step.id.as_str(),
                "status": record.status,
                "approver": record.approver,
                "reason": record.reason,
            }),
        );
    }

    let _ = audit.append(
        execution_id,
        now(),
        AuditKind::StepComplete,
        serde_json::json!({"step_id": step.id.as_str(), "proceed": proceed}),
    );

    proceed
}

/// The mode a step actually dispatches under: L2 forces simulation for
/// write actions regardless of the run's requested mode (§1, §4.9 step 7a);
/// every other step runs under the requested mode.
fn effective_mode(step: &Step, options: &OrchestratorOptions) -> ExecutionMode {
    if options.level == AutomationLevel::L2 && step.action.class() == ActionClass::Write {
        ExecutionMode::Simulation
    } else {
        options.mode
    }
}

const fn approval_status_label(outcome: crate::approval::ApprovalOutcome) -> &'static str {
    use crate::approval::ApprovalOutcome as O;
    match outcome {
        O::Approved | O::TimedOutAutoApproved => "approved",
        O::Denied => "denied",
        O::TimedOutHalt => "expired",
        O::TimedOutSkip => "expired",
    }
}

fn dispatch_failed_result(step: &Step) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: step.executor.clone(),
        success: false,
        skipped: false,
        started_at: now(),
        completed_at: now(),
        duration_ms: 0,
        output: Value::Null,
        error: Some(crate::execution::StepError {
            code: "dispatch_failed".to_owned(),
            message: "step could not be dispatched".to_owned(),
            retryable: false,
        }),
        metadata: serde_json::json!({}),
        approval: None,
    }
}

fn gated_result(step: &Step, reason: &str, halted: bool) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: step.executor.clone(),
        success: !halted,
        skipped: false,
        started_at: now(),
        completed_at: now(),
        duration_ms: 0,
        output: Value::Null,
        error: if halted {
            Some(crate::execution::StepError {
                code: "approval_error".to_owned(),
                message: crate::errors::sanitize_message(reason),
                retryable: false,
            })
        } else {
            None
        },
        metadata: serde_json::json!({}),
        approval: None,
    }
}

fn denied_result(step: &Step, outcome: crate::approval::ApprovalOutcome, record: ApprovalRecord) -> StepResult {
    let (code, message) = if outcome == crate::approval::ApprovalOutcome::TimedOutHalt {
        ("approval_expired", "approval expired (halt)".to_owned())
    } else {
        ("approval_denied", "approval request was denied".to_owned())
    };
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: step.executor.clone(),
        success: false,
        skipped: false,
        started_at: now(),
        completed_at: now(),
        duration_ms: 0,
        output: Value::Null,
        error: Some(crate::execution::StepError { code: code.to_owned(), message, retryable: false }),
        metadata: serde_json::json!({}),
        approval: Some(record),
    }
}

/// Builds the `success: true, skipped: true` result for a step whose
/// `on_error: skip` policy fired after its own dispatch or adapter call
/// failed (§4.4 "`skip` marks the step as skipped and proceeds without
/// treating it as failure"). Distinct from [`skipped_result`], which covers
/// the approval-timeout-skip path and carries an [`ApprovalRecord`]; this
/// path never reached the approval gate at all.
fn skipped_from_failure(step: &Step) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: step.executor.clone(),
        success: true,
        skipped: true,
        started_at: now(),
        completed_at: now(),
        duration_ms: 0,
        output: Value::Null,
        error: None,
        metadata: serde_json::json!({}),
        approval: None,
    }
}

fn skipped_result(step: &Step, record: ApprovalRecord) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: step.executor.clone(),
        // Per the documented expired-skip resolution (see execution.rs),
        // a skipped step is `success = true`.
        success: true,
        skipped: true,
        started_at: now(),
        completed_at: now(),
        duration_ms: 0,
        output: Value::Null,
        error: None,
        metadata: serde_json::json!({}),
        approval: Some(record),
    }
}

/// Groups steps into dependency-respecting waves: every step in wave *i*
/// depends only on steps in waves `0..i` (§4.9 step 6, §5 "Ordering
/// guarantees"). Assumes `steps` is already acyclic (checked by
/// [`Runbook::check_invariants`] before this runs); a defensive guard
/// against an unexpected cycle still terminates rather than looping forever.
fn execution_waves(steps: &[Step]) -> Vec<Vec<&Step>> {
    let mut remaining: Vec<&Step> = steps.iter().collect();
    let mut completed: HashSet<&StepId> = HashSet::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, rest): (Vec<&Step>, Vec<&Step>) =
            remaining.into_iter().partition(|s| s.depends_on.iter().all(|d| completed.contains(d)));
        if ready.is_empty() {
            // Defensive: would indicate an undetected cycle. Treat whatever
            // remains as one final wave rather than looping forever.
            waves.push(rest);
            break;
        }
        for step in &ready {
            completed.insert(&step.id);
        }
        waves.push(ready);
        remaining = rest;
    }

    waves
}

fn run_rollback(
    completed_steps: &[Step],
    execution: &Execution,
    registry: &AdapterRegistry,
    audit: &mut AuditChain,
) -> Vec<RollbackOutcome> {
    let mut log = Vec::new();
    for step in completed_steps.iter().rev() {
        let Some(rollback) = &step.rollback else { continue };
        let Some(adapter) = registry.get(&step.executor) else {
            log.push(RollbackOutcome {
                step_id: step.id.clone(),
                success: false,
                error: Some(format!("no adapter registered named {}", step.executor)),
            });
            continue;
        };

        let params_value = Value::Object(rollback.parameters.clone());
        let resolved = templating::resolve_templates(&params_value, &execution.context)
            .map(|r| r.value)
            .unwrap_or(params_value);

        let outcome = match adapter.rollback(rollback.action, &resolved) {
            Some(Ok(result)) => RollbackOutcome {
                step_id: step.id.clone(),
                success: result.success,
                error: result.error.map(|e| crate::errors::sanitize_message(&e.message)),
            },
            Some(Err(err)) => RollbackOutcome {
                step_id: step.id.clone(),
                success: false,
                error: Some(crate::errors::sanitize_message(&err.message)),
            },
            None => RollbackOutcome {
                step_id: step.id.clone(),
                success: false,
                error: Some("adapter does not support rollback for this action".to_owned()),
            },
        };
        let _ = audit.append(
            execution.execution_id.clone(),
            now(),
            AuditKind::RollbackComplete,
            serde_json::json!({"step_id": step.id.as_str(), "success": outcome.success}),
        );
        log.push(outcome);
    }
    log
}

fn advance(
    execution: &mut Execution,
    audit: &mut AuditChain,
    to: ExecutionState,
    reason: &str,
) -> Result<(), TransitionError> {
    let from = execution.state;
    state_machine::transition(from, to)?;
    execution.state = to;
    let _ = audit.append(
        execution.execution_id.clone(),
        now(),
        AuditKind::StateTransition,
        serde_json::json!({"from": format!("{from:?}"), "to": format!("{to:?}"), "reason": reason}),
    );
    Ok(())
}

fn finalize(execution: &mut Execution, completed_at: String) {
    execution.completed_at = Some(completed_at);
    if let Ok(started) = chrono::DateTime::parse_from_rfc3339(&execution.started_at) {
        if let Some(completed_at) = &execution.completed_at {
            if let Ok(completed) = chrono::DateTime::parse_from_rfc3339(completed_at) {
                let millis = (completed - started).num_milliseconds();
                execution.duration_ms = Some(u64::try_from(millis.max(0)).unwrap_or(0));
            }
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A minimal counting semaphore bounding the number of steps dispatching
/// concurrently across every wave of one run (§5 "an additional
/// process-wide ceiling"). Blocks the acquiring thread rather than failing;
/// this crate's waves are already bounded in size by the runbook's step
/// count, so unbounded blocking here cannot deadlock against itself.
struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    fn acquire(&self) -> SemaphorePermit<'_> {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while *guard == 0 {
            guard = self.condvar.wait(guard).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *guard -= 1;
        SemaphorePermit { semaphore: self }
    }

    fn release(&self) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += 1;
        self.condvar.notify_one();
    }
}

struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::adapter::Adapter;
    use crate::adapter::AdapterCapabilities;
    use crate::adapter::AdapterError;
    use crate::adapter::AdapterResult;
    use crate::adapter::HealthReport;
    use crate::adapter::HealthStatus;
    use crate::identifiers::StepId;
    use crate::policy::ActionSelector;
    use crate::policy::PolicyRule;
    use crate::runbook::Metadata;
    use crate::runbook::OnError;
    use crate::runbook::RunbookConfig;
    use crate::runbook::Triggers;
    use serde_json::json;

    struct EchoAdapter;

    impl Adapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn supported_actions(&self) -> &[Action] {
            &[Action::CollectLogs, Action::IsolateHost]
        }
        fn validate_parameters(&self, _action: Action, _params: &Value) -> Result<(), AdapterError> {
            Ok(())
        }
        fn execute(&self, action: Action, params: &Value, _mode: ExecutionMode) -> AdapterResult {
            AdapterResult {
                success: true,
                action,
                executor: "echo".to_owned(),
                duration_ms: 1,
                output: Some(params.clone()),
                error: None,
                metadata: None,
            }
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities { supports_validation: true, max_concurrency: 0 }
        }
        fn health_check(&self) -> HealthReport {
            HealthReport {
                status: HealthStatus::Healthy,
                message: "ok".to_owned(),
                latency_ms: Some(1),
                checked_at: "2026-01-01T00:00:00Z".to_owned(),
            }
        }
    }

    fn alert() -> AlertEvent {
        AlertEvent::from_json_value(&json!({
            "@timestamp": "2026-01-01T00:00:00Z",
            "event": {"kind": "alert", "severity": 80.0},
            "threat": {
                "framework": "MITRE ATT&CK",
                "technique": [{"id": "T1059.001", "name": "PowerShell"}],
            },
        }))
        .expect("parse")
    }

    fn step(id: &str, action: Action, on_error: OnError, depends_on: &[&str]) -> Step {
        Step {
            id: StepId::from(id),
            name: id.to_owned(),
            description: None,
            action,
            executor: "echo".to_owned(),
            parameters: serde_json::Map::new(),
            approval_required: None,
            rollback: None,
            on_error,
            timeout: 30,
            depends_on: depends_on.iter().map(|s| StepId::from(*s)).collect(),
            condition: None,
        }
    }

    fn runbook(steps: Vec<Step>, level: AutomationLevel, requires_approval: bool) -> Runbook {
        Runbook {
            id: RunbookId::new("3fa85f64-5717-4562-b3fc-2c963f66afa6"),
            version: "1.0.0".to_owned(),
            metadata: Metadata {
                name: "Contain and Notify".to_owned(),
                author: "soc-team".to_owned(),
                created: "2026-01-01T00:00:00Z".to_owned(),
                updated: "2026-01-01T00:00:00Z".to_owned(),
                tags: vec!["endpoint".to_owned()],
                references: vec![],
            },
            triggers: Triggers {
                detection_source: vec!["edr".to_owned()],
                mitre_technique: vec!["T1059.001".to_owned()],
                platform: vec!["linux".to_owned()],
                severities: vec![],
            },
            config: RunbookConfig {
                automation_level: level,
                max_execution_time: 300,
                requires_approval,
                approval_timeout: None,
                parallel_execution: false,
                rollback_on_failure: false,
            },
            steps,
        }
    }

    fn wildcard_policy(min_level: AutomationLevel, requires_approval: bool) -> AutomationPolicy {
        AutomationPolicy {
            name: "default".to_owned(),
            description: "test policy".to_owned(),
            rules: vec![PolicyRule {
                action: ActionSelector::Wildcard,
                min_level,
                requires_approval,
                allowed_modes: vec![ExecutionMode::Production, ExecutionMode::Simulation, ExecutionMode::DryRun],
                max_risk_score: None,
                admin_override: false,
            }],
        }
    }

    fn registry() -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(EchoAdapter)).expect("register");
        registry
    }

    #[test]
    fn unique_technique_match_resolves_without_confirmation() {
        let candidates = vec![runbook(vec![step("s1", Action::CollectLogs, OnError::Halt, &[])], AutomationLevel::L0, false)];
        let id = resolve_runbook_id(
            &alert(),
            &candidates,
            &RunbookSelector::AutoDetect { llm_suggestion: None },
            None,
        )
        .expect("resolved");
        assert_eq!(id, candidates[0].id);
    }

    #[test]
    fn ambiguous_match_without_confirm_callback_is_an_error() {
        let mut second = runbook(vec![step("s1", Action::CollectLogs, OnError::Halt, &[])], AutomationLevel::L0, false);
        second.id = RunbookId::new("second-id");
        let candidates = vec![
            runbook(vec![step("s1", Action::CollectLogs, OnError::Halt, &[])], AutomationLevel::L0, false),
            second,
        ];
        let err = resolve_runbook_id(
            &alert(),
            &candidates,
            &RunbookSelector::AutoDetect { llm_suggestion: None },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::ConfirmationRequired(_)));
    }

    #[test]
    fn explicit_selector_rejects_unknown_id() {
        let candidates = vec![runbook(vec![step("s1", Action::CollectLogs, OnError::Halt, &[])], AutomationLevel::L0, false)];
        let err = resolve_runbook_id(
            &alert(),
            &candidates,
            &RunbookSelector::Explicit(RunbookId::new("ghost")),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownExplicitId(_)));
    }

    #[test]
    fn l0_read_only_run_completes() {
        let rb = runbook(
            vec![step("s1", Action::CollectLogs, OnError::Halt, &[]), step("s2", Action::CollectLogs, OnError::Halt, &["s1"])],
            AutomationLevel::L0,
            false,
        );
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, false);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L0, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Completed);
        assert_eq!(outcome.step_results.len(), 2);
        assert!(outcome.step_results.iter().all(|r| r.success));
    }

    #[test]
    fn l1_write_step_approved_synchronously_executes() {
        let rb = runbook(vec![step("s1", Action::IsolateHost, OnError::Halt, &[])], AutomationLevel::L1, true);
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, true);
        let controller = ExecutionController::new();
        let approve = |_: &ApprovalRequest| {
            Ok(ApprovalResponse { approved: true, approver: Some("alice".to_owned()), reason: None })
        };

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L1, mode: ExecutionMode::Production, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            Some(Arc::new(approve)),
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Completed);
        assert!(outcome.step_results[0].success);
        assert!(outcome.step_results[0].approval.is_some());
    }

    #[test]
    fn l1_write_step_denied_halts_the_execution() {
        let rb = runbook(vec![step("s1", Action::IsolateHost, OnError::Halt, &[])], AutomationLevel::L1, true);
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, true);
        let controller = ExecutionController::new();
        let deny = |_: &ApprovalRequest| {
            Ok(ApprovalResponse { approved: false, approver: Some("bob".to_owned()), reason: Some("too risky".to_owned()) })
        };

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L1, mode: ExecutionMode::Production, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            Some(Arc::new(deny)),
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Failed);
        assert!(!outcome.step_results[0].success);
    }

    #[test]
    fn l2_write_step_is_simulated_and_queued_never_dispatched_for_real() {
        let rb = runbook(vec![step("s1", Action::IsolateHost, OnError::Halt, &[])], AutomationLevel::L2, true);
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, true);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions {
                level: AutomationLevel::L2,
                enable_l2: true,
                mode: ExecutionMode::Production,
                ..OrchestratorOptions::default()
            },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Completed);
        assert_eq!(outcome.queue_entries.len(), 1);
        assert_eq!(outcome.queue_entries[0].status, ApprovalQueueStatus::Pending);
    }

    #[test]
    fn l2_without_enable_flag_fails_the_run() {
        let rb = runbook(vec![step("s1", Action::IsolateHost, OnError::Halt, &[])], AutomationLevel::L2, true);
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, true);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L2, enable_l2: false, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Failed);
        assert!(outcome.queue_entries.is_empty());
    }

    #[test]
    fn halting_failure_with_rollback_enabled_rolls_back_completed_steps() {
        let mut first = step("s1", Action::IsolateHost, OnError::Halt, &[]);
        first.rollback = Some(crate::runbook::RollbackSpec {
            action: Action::RestoreConnectivity,
            parameters: serde_json::Map::new(),
            timeout: 30,
            on_error: None,
        });
        let mut rb = runbook(vec![first, step("s2", Action::QuerySiem, OnError::Halt, &["s1"])], AutomationLevel::L1, true);
        rb.config.rollback_on_failure = true;
        // second step's executor is never registered, forcing a dispatch failure.
        rb.steps[1].executor = "ghost".to_owned();
        let candidates = vec![rb.clone()];
        let mut registry_with_echo = registry();
        registry_with_echo
            .register(Box::new(EchoAdapter))
            .unwrap_or(());
        let policy = wildcard_policy(AutomationLevel::L0, false);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L1, mode: ExecutionMode::Production, ..OrchestratorOptions::default() },
            &registry_with_echo,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::RolledBack);
        assert_eq!(outcome.rollback_log.len(), 1);
        assert_eq!(outcome.rollback_log[0].step_id, StepId::from("s1"));
    }

    #[test]
    fn invalid_runbook_is_rejected_before_an_execution_is_created() {
        let mut rb = runbook(vec![step("s1", Action::CollectLogs, OnError::Halt, &["ghost"])], AutomationLevel::L0, false);
        rb.id = RunbookId::new("invalid-rb");
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, false);
        let controller = ExecutionController::new();

        let err = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions::default(),
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidRunbook(_)));
        assert!(controller.list_active().is_empty());
    }

    /// An adapter that records whether `execute` was ever called, used to
    /// prove a halted approval never reaches dispatch.
    struct TripwireAdapter(std::sync::atomic::AtomicBool);

    impl Adapter for TripwireAdapter {
        fn name(&self) -> &str {
            "tripwire"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn supported_actions(&self) -> &[Action] {
            &[Action::IsolateHost]
        }
        fn validate_parameters(&self, _action: Action, _params: &Value) -> Result<(), AdapterError> {
            Ok(())
        }
        fn execute(&self, action: Action, params: &Value, _mode: ExecutionMode) -> AdapterResult {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            AdapterResult {
                success: true,
                action,
                executor: "tripwire".to_owned(),
                duration_ms: 1,
                output: Some(params.clone()),
                error: None,
                metadata: None,
            }
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities { supports_validation: true, max_concurrency: 0 }
        }
        fn health_check(&self) -> HealthReport {
            HealthReport {
                status: HealthStatus::Healthy,
                message: "ok".to_owned(),
                latency_ms: Some(1),
                checked_at: "2026-01-01T00:00:00Z".to_owned(),
            }
        }
    }

    #[test]
    fn approval_timeout_halt_never_dispatches_and_fails_the_run() {
        let mut isolate = step("s1", Action::IsolateHost, OnError::Halt, &[]);
        isolate.executor = "tripwire".to_owned();
        let rb = runbook(vec![isolate], AutomationLevel::L1, true);
        let candidates = vec![rb.clone()];
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(TripwireAdapter(std::sync::atomic::AtomicBool::new(false))))
            .expect("register");
        let policy = wildcard_policy(AutomationLevel::L0, true);
        let controller = ExecutionController::new();

        // A prompt that never answers within the window; the gate's own
        // timeout races it independently of how long this closure blocks.
        let never_answers = |_: &ApprovalRequest| {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(ApprovalResponse { approved: true, approver: Some("late".to_owned()), reason: None })
        };

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions {
                level: AutomationLevel::L1,
                mode: ExecutionMode::Production,
                approval: ApprovalOptions {
                    timeout: std::time::Duration::from_millis(20),
                    on_timeout: crate::approval::TimeoutBehavior::Halt,
                },
                ..OrchestratorOptions::default()
            },
            &registry,
            &policy,
            &controller,
            Some(Arc::new(never_answers)),
            None,
        )
        .expect("run completes despite the timeout");

        assert_eq!(outcome.execution.state, ExecutionState::Failed);
        assert!(!outcome.step_results[0].success);
        assert_eq!(outcome.step_results[0].approval.as_ref().map(|a| a.status.as_str()), Some("expired"));
        assert_eq!(outcome.execution.error.as_deref(), Some("approval expired (halt)"));
    }

    /// An adapter whose `execute` always fails with a non-retryable error,
    /// used to exercise `on_error: skip` on a real (not merely dispatch)
    /// failure.
    struct FailingAdapter;

    impl Adapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn supported_actions(&self) -> &[Action] {
            &[Action::CollectLogs]
        }
        fn validate_parameters(&self, _action: Action, _params: &Value) -> Result<(), AdapterError> {
            Ok(())
        }
        fn execute(&self, action: Action, _params: &Value, _mode: ExecutionMode) -> AdapterResult {
            AdapterResult {
                success: false,
                action,
                executor: "failing".to_owned(),
                duration_ms: 1,
                output: None,
                error: Some(AdapterError {
                    code: "api".to_owned(),
                    message: "simulated failure".to_owned(),
                    adapter: "failing".to_owned(),
                    action,
                    retryable: false,
                    step_id: None,
                    retry_after_ms: None,
                }),
                metadata: None,
            }
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities { supports_validation: true, max_concurrency: 0 }
        }
        fn health_check(&self) -> HealthReport {
            HealthReport {
                status: HealthStatus::Healthy,
                message: "ok".to_owned(),
                latency_ms: Some(1),
                checked_at: "2026-01-01T00:00:00Z".to_owned(),
            }
        }
    }

    #[test]
    fn on_error_skip_turns_a_real_adapter_failure_into_a_skipped_success() {
        let rb = runbook(vec![step("s1", Action::CollectLogs, OnError::Skip, &[])], AutomationLevel::L0, false);
        let candidates = vec![rb.clone()];
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(FailingAdapter)).expect("register");
        let policy = wildcard_policy(AutomationLevel::L0, false);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L0, mode: ExecutionMode::Production, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Completed);
        assert!(outcome.step_results[0].success);
        assert!(outcome.step_results[0].skipped);
        assert!(outcome.step_results[0].error.is_none());
    }

    #[test]
    fn on_error_skip_turns_a_dispatch_failure_into_a_skipped_success() {
        let mut s1 = step("s1", Action::CollectLogs, OnError::Skip, &[]);
        s1.executor = "ghost".to_owned();
        let rb = runbook(vec![s1], AutomationLevel::L0, false);
        let candidates = vec![rb.clone()];
        let registry = AdapterRegistry::new();
        let policy = wildcard_policy(AutomationLevel::L0, false);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L0, mode: ExecutionMode::Production, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::Completed);
        assert!(outcome.step_results[0].success);
        assert!(outcome.step_results[0].skipped);
    }

    #[test]
    fn a_continue_step_that_fails_is_never_rolled_back() {
        // s0 succeeds and has no rollback of its own; its only job is to
        // make `completed_steps` non-empty so the rollback sequence actually
        // runs (otherwise an empty `completed_steps` would skip rollback
        // entirely and the assertion below would pass for the wrong reason).
        let s0 = step("s0", Action::CollectLogs, OnError::Halt, &[]);
        let mut first = step("s1", Action::CollectLogs, OnError::Continue, &["s0"]);
        first.executor = "failing".to_owned();
        first.rollback = Some(crate::runbook::RollbackSpec {
            action: Action::CollectLogs,
            parameters: serde_json::Map::new(),
            timeout: 30,
            on_error: None,
        });
        let mut second = step("s2", Action::QuerySiem, OnError::Halt, &["s1"]);
        second.executor = "ghost".to_owned();
        let mut rb = runbook(vec![s0, first, second], AutomationLevel::L0, false);
        rb.config.rollback_on_failure = true;
        let candidates = vec![rb.clone()];
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(EchoAdapter)).expect("register");
        registry.register(Box::new(FailingAdapter)).expect("register");
        let policy = wildcard_policy(AutomationLevel::L0, false);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions { level: AutomationLevel::L0, mode: ExecutionMode::Production, ..OrchestratorOptions::default() },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::RolledBack);
        assert!(!outcome.step_results[1].success);
        // s1 declared a rollback, but it never reached `completed_steps`
        // because it failed; only s0 (no rollback) was eligible, so nothing
        // is actually rolled back.
        assert!(outcome.rollback_log.is_empty());
    }

    #[test]
    fn an_l2_queued_step_is_never_rolled_back() {
        // s0 succeeds and has no rollback of its own, for the same reason
        // as in the test above: it makes `completed_steps` non-empty so
        // rollback genuinely runs instead of short-circuiting on "nothing
        // completed yet".
        let s0 = step("s0", Action::QuerySiem, OnError::Halt, &[]);
        let mut first = step("s1", Action::IsolateHost, OnError::Halt, &["s0"]);
        first.rollback = Some(crate::runbook::RollbackSpec {
            action: Action::RestoreConnectivity,
            parameters: serde_json::Map::new(),
            timeout: 30,
            on_error: None,
        });
        let mut second = step("s2", Action::QuerySiem, OnError::Halt, &["s1"]);
        second.executor = "ghost".to_owned();
        let mut rb = runbook(vec![s0, first, second], AutomationLevel::L2, true);
        rb.config.rollback_on_failure = true;
        let candidates = vec![rb.clone()];
        let registry = registry();
        let policy = wildcard_policy(AutomationLevel::L0, true);
        let controller = ExecutionController::new();

        let outcome = run(
            &alert(),
            &candidates,
            RunbookSelector::Explicit(rb.id.clone()),
            HashMap::new(),
            OrchestratorOptions {
                level: AutomationLevel::L2,
                enable_l2: true,
                mode: ExecutionMode::Production,
                ..OrchestratorOptions::default()
            },
            &registry,
            &policy,
            &controller,
            None,
            None,
        )
        .expect("run succeeds");

        assert_eq!(outcome.execution.state, ExecutionState::RolledBack);
        assert_eq!(outcome.queue_entries.len(), 1);
        // s1 (the L2 write) was only simulated and queued, never applied,
        // so it must not be in the rollback sequence even though it declared
        // a rollback action.
        assert!(outcome.rollback_log.is_empty());
    }
}
