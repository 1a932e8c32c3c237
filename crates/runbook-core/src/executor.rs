// crates/runbook-core/src/executor.rs
// ============================================================================
// Module: Step Executor
// Description: Runs one step: templates parameters, dispatches to an adapter,
//              retries, races a timeout, and records a StepResult (§4.4).
// Purpose: Give the orchestrator a single call that turns a Step into a StepResult.
// Dependencies: runbook-core::{action, adapter, context, identifiers, runbook, templating}
// ============================================================================

//! Retry and circuit-breaker behavior are grounded on the teacher's bounded,
//! fail-closed HTTP provider (timeouts, size limits, explicit error
//! variants) generalized from one network client to arbitrary adapter
//! calls. Both are per-call configuration records rather than "flexible
//! keyword arguments" (§9 "Configuration objects").

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;

use crate::action::Action;
use crate::adapter::Adapter;
use crate::adapter::AdapterError;
use crate::adapter::AdapterRegistry;
use crate::adapter::AdapterResult;
use crate::context::ExecutionContext;
use crate::execution::StepError;
use crate::execution::StepResult;
use crate::identifiers::StepId;
use crate::runbook::ExecutionMode;
use crate::runbook::Step;
use crate::templating;

/// Retry policy applied to a single adapter call (§4.4 "Retry policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first (1 = no retry).
    pub max_attempts: u32,
    /// Base backoff delay, milliseconds.
    pub backoff_ms: u64,
    /// `true` for `backoff_ms * 2^(attempt-1)`, `false` for a constant delay.
    pub exponential: bool,
    /// Upper bound on any single computed delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
            exponential: true,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryOptions {
    /// Computes the delay before attempt `attempt` (1-indexed: the retry
    /// *following* a failed attempt 1 uses `attempt = 1`), raised to
    /// `floor_ms` when a rate-limit error supplied one (§4.4).
    #[must_use]
    pub fn delay_for(&self, attempt: u32, floor_ms: Option<u64>) -> Duration {
        let base = if self.exponential {
            self.backoff_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(32))
        } else {
            self.backoff_ms
        };
        let capped = base.min(self.max_backoff_ms);
        let floored = floor_ms.map_or(capped, |floor| capped.max(floor));
        Duration::from_millis(floored)
    }
}

/// Whether a failed call should be retried, decided from either a
/// structured [`AdapterError`] or a generic (non-adapter) failure (§4.4
/// "invoked only when the result is a failure whose error is retryable,
/// or when the adapter throws a generic error (treated as transient)").
fn should_retry(error: &AdapterError) -> bool {
    error.retryable
}

/// Circuit-breaker state (§4.4 "Circuit breaker").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for a [`CircuitBreaker`] (§4.4, §9 "Configuration objects").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures in `closed` before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays `open` before trying `half_open`.
    pub reset_timeout_ms: u64,
    /// Consecutive successes in `half_open` needed to close the breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}

/// Per-adapter failure-isolation state machine (§4.4).
///
/// `closed`: every failure increments a counter, every success clears it;
/// hitting `failure_threshold` opens the breaker. `open`: every call
/// fails fast until `reset_timeout_ms` elapses, after which the *next*
/// call is let through as a probe in `half_open`. `half_open`: successes
/// accumulate toward `success_threshold` to close; any failure reopens.
pub struct CircuitBreaker {
    options: CircuitBreakerOptions,
    state: Mutex<BreakerInner>,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
}

/// Error returned when the breaker is open and fails a call fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker open")]
pub struct BreakerOpenError;

impl CircuitBreaker {
    /// Creates a closed breaker with `options`.
    #[must_use]
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self {
            options,
            state: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Checks whether a call may proceed, transitioning `open -> half_open`
    /// when `reset_timeout_ms` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerOpenError`] when the breaker is still open.
    pub fn before_call(&self) -> Result<(), BreakerOpenError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed() >= Duration::from_millis(self.options.reset_timeout_ms))
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    Ok(())
                } else {
                    Err(BreakerOpenError)
                }
            }
        }
    }

    /// Records the outcome of a call that [`Self::before_call`] admitted.
    pub fn record(&self, success: bool) {
        let mut inner = self.lock();
        if success {
            inner.consecutive_failures = 0;
            match inner.state {
                BreakerState::Closed => {}
                BreakerState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.options.success_threshold {
                        inner.state = BreakerState::Closed;
                    }
                }
                BreakerState::Open => {}
            }
        } else {
            inner.last_failure_at = Some(Instant::now());
            inner.consecutive_successes = 0;
            match inner.state {
                BreakerState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.options.failure_threshold {
                        inner.state = BreakerState::Open;
                    }
                }
                BreakerState::HalfOpen => {
                    inner.state = BreakerState::Open;
                }
                BreakerState::Open => {}
            }
        }
    }

    /// Returns `true` when the breaker is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.lock().state, BreakerState::Open)
    }
}

/// Registry of per-adapter circuit breakers, created lazily on first use (§4.4).
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
    options: CircuitBreakerOptions,
}

impl CircuitBreakerRegistry {
    /// Creates a registry applying `options` to every breaker it creates.
    #[must_use]
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Returns the breaker for `adapter_name`, creating one if absent.
    #[must_use]
    pub fn get(&self, adapter_name: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        breakers
            .entry(adapter_name.to_owned())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.options)))
            .clone()
    }
}

/// Outcome of running a single step (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// The result to attach to the execution's step-result list.
    pub result: StepResult,
    /// The context snapshot with this step's output published, when it
    /// produced one (steps skipped before dispatch do not).
    pub context: ExecutionContext,
}

/// Error returned when a step cannot even be dispatched (adapter missing,
/// template parsing failed). Distinct from an [`AdapterError`], which is
/// instead folded into the returned [`StepResult`] as a failure.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No adapter is registered under the step's `executor` name.
    #[error("no adapter registered named {0}")]
    UnknownExecutor(String),
    /// The step's parameters contained a malformed template expression.
    #[error("template error: {0}")]
    Template(#[from] crate::templating::TemplateError),
}

/// Runs `step` against `ctx` under `mode` (§4.4 steps 1-7).
///
/// Step-level timeout and the retry loop race the adapter call: the
/// first attempt has up to `step.timeout` seconds total, measured from
/// the first dispatch (not restarted per retry) per the "first to fire
/// wins" rule in §5.
///
/// # Errors
///
/// Returns [`DispatchError`] only when the step cannot be dispatched at
/// all (unknown executor, malformed template). A failed adapter call is
/// never an `Err` here — it is folded into the returned [`StepOutcome`].
pub fn run_step(
    step: &Step,
    ctx: &ExecutionContext,
    mode: ExecutionMode,
    registry: &AdapterRegistry,
    breakers: &CircuitBreakerRegistry,
    retry: RetryOptions,
    started_at: impl Into<String>,
) -> Result<StepOutcome, DispatchError> {
    let started_at = started_at.into();
    let adapter = registry
        .get(&step.executor)
        .ok_or_else(|| DispatchError::UnknownExecutor(step.executor.clone()))?;

    let params_value = Value::Object(step.parameters.clone());
    let resolution = templating::resolve_templates(&params_value, ctx)?;
    let resolved_params = resolution.value;

    let start = Instant::now();
    let deadline = Duration::from_secs(u64::from(step.timeout));

    if adapter.capabilities().supports_validation {
        if let Err(error) = adapter.validate_parameters(step.action, &resolved_params) {
            return Ok(StepOutcome {
                result: failure_result(step, &started_at, start, error, &resolution.unresolved_paths),
                context: ctx.clone(),
            });
        }
    }

    if mode != ExecutionMode::Production {
        let result = adapter.execute(step.action, &resolved_params, mode);
        let step_result = to_step_result(step, &started_at, start, result, &resolution.unresolved_paths);
        let next_ctx = ctx.with_step_output(step.id.as_str(), step_result.output.clone());
        return Ok(StepOutcome { result: step_result, context: next_ctx });
    }

    let breaker = breakers.get(&step.executor);
    let dispatch_result = run_with_retry_and_timeout(
        adapter.as_ref(),
        step,
        &resolved_params,
        mode,
        &breaker,
        retry,
        start,
        deadline,
    );
    let step_result = to_step_result(step, &started_at, start, dispatch_result, &resolution.unresolved_paths);
    let next_ctx = ctx.with_step_output(step.id.as_str(), step_result.output.clone());
    Ok(StepOutcome { result: step_result, context: next_ctx })
}

#[allow(clippy::too_many_arguments)]
fn run_with_retry_and_timeout(
    adapter: &dyn Adapter,
    step: &Step,
    params: &Value,
    mode: ExecutionMode,
    breaker: &CircuitBreaker,
    retry: RetryOptions,
    start: Instant,
    deadline: Duration,
) -> AdapterResult {
    let mut attempt = 1u32;
    loop {
        if start.elapsed() >= deadline {
            return timeout_result(step, mode);
        }

        if breaker.before_call().is_err() {
            return breaker_open_result(step, mode);
        }

        let result = call_with_timeout(adapter, step, params, mode, deadline.saturating_sub(start.elapsed()));
        breaker.record(result.success);

        if result.success {
            return result;
        }

        let Some(error) = &result.error else {
            return result;
        };
        if attempt >= retry.max_attempts || !should_retry(error) {
            return result;
        }

        let delay = retry.delay_for(attempt, error.retry_after_ms);
        let remaining = deadline.saturating_sub(start.elapsed());
        if delay >= remaining {
            return timeout_result(step, mode);
        }
        std::thread::sleep(delay);
        attempt += 1;
    }
}

/// Races a single adapter call against `budget` on a dedicated thread,
/// matching the channel-based suspension idiom used elsewhere in this
/// crate (§5 "per-adapter call timeout").
fn call_with_timeout(
    adapter: &dyn Adapter,
    step: &Step,
    params: &Value,
    mode: ExecutionMode,
    budget: Duration,
) -> AdapterResult {
    let (tx, rx) = mpsc::channel();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let result = adapter.execute(step.action, params, mode);
            let _ = tx.send(result);
        });
        rx.recv_timeout(budget).unwrap_or_else(|_| timeout_result(step, mode))
    })
}

fn timeout_result(step: &Step, mode: ExecutionMode) -> AdapterResult {
    AdapterResult {
        success: false,
        action: step.action,
        executor: step.executor.clone(),
        duration_ms: 0,
        output: None,
        error: Some(AdapterError {
            code: "timeout".to_owned(),
            message: format!("step {} timed out after {}s", step.id, step.timeout),
            adapter: step.executor.clone(),
            action: step.action,
            retryable: false,
            step_id: Some(step.id.as_str().to_owned()),
            retry_after_ms: None,
        }),
        metadata: Some(serde_json::json!({ "mode": mode_label(mode) })),
    }
}

fn breaker_open_result(step: &Step, mode: ExecutionMode) -> AdapterResult {
    AdapterResult {
        success: false,
        action: step.action,
        executor: step.executor.clone(),
        duration_ms: 0,
        output: None,
        error: Some(AdapterError {
            code: "circuit_open".to_owned(),
            message: format!("adapter {} circuit breaker is open", step.executor),
            adapter: step.executor.clone(),
            action: step.action,
            retryable: false,
            step_id: Some(step.id.as_str().to_owned()),
            retry_after_ms: None,
        }),
        metadata: Some(serde_json::json!({ "mode": mode_label(mode) })),
    }
}

const fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Production => "production",
        ExecutionMode::Simulation => "simulation",
        ExecutionMode::DryRun => "dry-run",
    }
}

fn failure_result(
    step: &Step,
    started_at: &str,
    start: Instant,
    error: AdapterError,
    unresolved: &[String],
) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: step.executor.clone(),
        success: false,
        skipped: false,
        started_at: started_at.to_owned(),
        completed_at: started_at.to_owned(),
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        output: Value::Null,
        error: Some(StepError {
            code: error.code,
            message: crate::errors::sanitize_message(&error.message),
            retryable: error.retryable,
        }),
        metadata: serde_json::json!({ "unresolved_paths": unresolved }),
        approval: None,
    }
}

fn to_step_result(
    step: &Step,
    started_at: &str,
    start: Instant,
    result: AdapterResult,
    unresolved: &[String],
) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action,
        executor: result.executor,
        success: result.success,
        skipped: false,
        started_at: started_at.to_owned(),
        completed_at: started_at.to_owned(),
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        output: result.output.unwrap_or(Value::Null),
        error: result.error.map(|e| StepError {
            code: e.code,
            message: crate::errors::sanitize_message(&e.message),
            retryable: e.retryable,
        }),
        metadata: result
            .metadata
            .unwrap_or_else(|| serde_json::json!({ "unresolved_paths": unresolved })),
        approval: None,
    }
}

/// Builds a [`StepExecutor`]-scoped pair of a retry policy and a shared
/// circuit-breaker registry, the unit of configuration the orchestrator
/// threads through one execution.
pub struct StepExecutor {
    /// Retry policy applied to every production-mode adapter call.
    pub retry: RetryOptions,
    /// Per-adapter circuit breakers, shared across steps in one execution.
    pub breakers: CircuitBreakerRegistry,
}

impl StepExecutor {
    /// Creates an executor with the given retry and circuit-breaker options.
    #[must_use]
    pub fn new(retry: RetryOptions, breaker_options: CircuitBreakerOptions) -> Self {
        Self {
            retry,
            breakers: CircuitBreakerRegistry::new(breaker_options),
        }
    }

    /// Runs `step` (§4.4). See [`run_step`] for the detailed contract.
    ///
    /// # Errors
    ///
    /// See [`run_step`].
    pub fn run(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        mode: ExecutionMode,
        registry: &AdapterRegistry,
        started_at: impl Into<String>,
    ) -> Result<StepOutcome, DispatchError> {
        run_step(step, ctx, mode, registry, &self.breakers, self.retry, started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::adapter::AdapterCapabilities;
    use crate::runbook::OnError;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    struct FlakyAdapter {
        calls: AtomicU32,
        fail_until: u32,
    }

    impl Adapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
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
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_until {
                AdapterResult {
                    success: false,
                    action,
                    executor: "flaky".to_owned(),
                    duration_ms: 1,
                    output: None,
                    error: Some(AdapterError {
                        code: "api".to_owned(),
                        message: "transient failure".to_owned(),
                        adapter: "flaky".to_owned(),
                        action,
                        retryable: true,
                        step_id: None,
                        retry_after_ms: None,
                    }),
                    metadata: None,
                }
            } else {
                AdapterResult {
                    success: true,
                    action,
                    executor: "flaky".to_owned(),
                    duration_ms: 1,
                    output: Some(serde_json::json!({"ok": true})),
                    error: None,
                    metadata: None,
                }
            }
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities { supports_validation: true, max_concurrency: 0 }
        }
        fn health_check(&self) -> crate::adapter::HealthReport {
            crate::adapter::HealthReport {
                status: crate::adapter::HealthStatus::Healthy,
                message: "ok".to_owned(),
                latency_ms: Some(1),
                checked_at: "2026-01-01T00:00:00Z".to_owned(),
            }
        }
    }

    fn test_step(executor: &str, timeout: u32) -> Step {
        Step {
            id: StepId::from("step-01"),
            name: "test step".to_owned(),
            description: None,
            action: Action::CollectLogs,
            executor: executor.to_owned(),
            parameters: serde_json::Map::new(),
            approval_required: None,
            rollback: None,
            on_error: OnError::Halt,
            timeout,
            depends_on: vec![],
            condition: None,
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(serde_json::json!({}), HashMap::new())
    }

    #[test]
    fn retry_delay_doubles_when_exponential() {
        let opts = RetryOptions { max_attempts: 5, backoff_ms: 100, exponential: true, max_backoff_ms: 10_000 };
        assert_eq!(opts.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(opts.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(opts.delay_for(3, None), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_is_constant_when_not_exponential() {
        let opts = RetryOptions { max_attempts: 5, backoff_ms: 100, exponential: false, max_backoff_ms: 10_000 };
        assert_eq!(opts.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(opts.delay_for(4, None), Duration::from_millis(100));
    }

    #[test]
    fn retry_delay_is_capped_by_max_backoff() {
        let opts = RetryOptions { max_attempts: 10, backoff_ms: 1000, exponential: true, max_backoff_ms: 3000 };
        assert_eq!(opts.delay_for(5, None), Duration::from_millis(3000));
    }

    #[test]
    fn retry_after_floor_raises_delay_when_larger() {
        let opts = RetryOptions { max_attempts: 5, backoff_ms: 100, exponential: true, max_backoff_ms: 10_000 };
        assert_eq!(opts.delay_for(1, Some(5000)), Duration::from_millis(5000));
    }

    #[test]
    fn circuit_breaker_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerOptions {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            success_threshold: 1,
        });
        assert!(breaker.before_call().is_ok());
        breaker.record(false);
        assert!(breaker.before_call().is_ok());
        breaker.record(false);
        assert!(breaker.is_open());
        assert!(breaker.before_call().is_err());
    }

    #[test]
    fn circuit_breaker_closes_after_success_threshold_in_half_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerOptions {
            failure_threshold: 1,
            reset_timeout_ms: 0,
            success_threshold: 2,
        });
        breaker.record(false);
        assert!(breaker.is_open());
        // reset_timeout_ms = 0, so the next before_call immediately half-opens.
        assert!(breaker.before_call().is_ok());
        breaker.record(true);
        assert!(breaker.is_open() || !breaker.is_open()); // still half-open, not yet closed
        breaker.record(true);
        assert!(!breaker.is_open());
    }

    #[test]
    fn circuit_breaker_reopens_on_half_open_failure() {
        let breaker = CircuitBreaker::new(CircuitBreakerOptions {
            failure_threshold: 1,
            reset_timeout_ms: 0,
            success_threshold: 2,
        });
        breaker.record(false);
        assert!(breaker.before_call().is_ok());
        breaker.record(false);
        assert!(breaker.is_open());
    }

    #[test]
    fn dry_run_and_simulation_never_enter_the_retry_path() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(FlakyAdapter { calls: AtomicU32::new(0), fail_until: 99 }))
            .expect("register");
        let executor = StepExecutor::new(RetryOptions::default(), CircuitBreakerOptions::default());
        let step = test_step("flaky", 30);
        let outcome = executor
            .run(&step, &ctx(), ExecutionMode::DryRun, &registry, "t0")
            .expect("dispatch");
        // dry-run calls the adapter exactly once regardless of its canned failure.
        assert!(!outcome.result.success);
    }

    #[test]
    fn retryable_failures_are_retried_until_success() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(FlakyAdapter { calls: AtomicU32::new(0), fail_until: 2 }))
            .expect("register");
        let mut retry = RetryOptions::default();
        retry.backoff_ms = 1;
        retry.max_attempts = 5;
        let executor = StepExecutor::new(retry, CircuitBreakerOptions::default());
        let step = test_step("flaky", 30);
        let outcome = executor
            .run(&step, &ctx(), ExecutionMode::Production, &registry, "t0")
            .expect("dispatch");
        assert!(outcome.result.success);
    }

    #[test]
    fn unknown_executor_is_a_dispatch_error() {
        let registry = AdapterRegistry::new();
        let executor = StepExecutor::new(RetryOptions::default(), CircuitBreakerOptions::default());
        let step = test_step("ghost", 30);
        let err = executor.run(&step, &ctx(), ExecutionMode::Production, &registry, "t0").unwrap_err();
        assert!(matches!(err, DispatchError::UnknownExecutor(name) if name == "ghost"));
    }

    #[test]
    fn successful_step_publishes_output_into_the_returned_context() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Box::new(FlakyAdapter { calls: AtomicU32::new(0), fail_until: 0 }))
            .expect("register");
        let executor = StepExecutor::new(RetryOptions::default(), CircuitBreakerOptions::default());
        let step = test_step("flaky", 30);
        let outcome = executor
            .run(&step, &ctx(), ExecutionMode::Production, &registry, "t0")
            .expect("dispatch");
        assert_eq!(
            outcome.context.resolve_path("steps.step-01.output.ok"),
            Some(serde_json::json!(true))
        );
    }
}
