// crates/runbook-adapters/src/wait.rs
// ============================================================================
// Module: Wait Adapter
// Description: Reference adapter for the `wait` action.
// Purpose: Let a runbook step pause without reaching any external system.
// Dependencies: runbook-core::adapter
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use serde_json::Value;

use runbook_core::action::Action;
use runbook_core::adapter::Adapter;
use runbook_core::adapter::AdapterCapabilities;
use runbook_core::adapter::AdapterError;
use runbook_core::adapter::AdapterResult;
use runbook_core::adapter::HealthReport;
use runbook_core::adapter::HealthStatus;
use runbook_core::runbook::ExecutionMode;

const SUPPORTED: [Action; 1] = [Action::Wait];
const MAX_WAIT_MS: u64 = 60_000;

/// Adapter that sleeps for `duration_ms` (capped at one minute) and returns.
#[derive(Default)]
pub struct WaitAdapter;

impl Adapter for WaitAdapter {
    fn name(&self) -> &str {
        "wait"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn supported_actions(&self) -> &[Action] {
        &SUPPORTED
    }

    fn validate_parameters(&self, action: Action, params: &Value) -> Result<(), AdapterError> {
        match params.get("duration_ms") {
            Some(Value::Number(n)) if n.as_u64().is_some_and(|ms| ms <= MAX_WAIT_MS) => Ok(()),
            _ => Err(AdapterError {
                code: "api".to_owned(),
                message: format!("duration_ms must be an integer <= {MAX_WAIT_MS}"),
                adapter: self.name().to_owned(),
                action,
                retryable: false,
                step_id: None,
                retry_after_ms: None,
            }),
        }
    }

    fn execute(&self, action: Action, params: &Value, mode: ExecutionMode) -> AdapterResult {
        let start = Instant::now();
        let duration_ms = params.get("duration_ms").and_then(Value::as_u64).unwrap_or(0).min(MAX_WAIT_MS);
        if matches!(mode, ExecutionMode::Production) {
            std::thread::sleep(Duration::from_millis(duration_ms));
        }
        AdapterResult {
            success: true,
            action,
            executor: self.name().to_owned(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            output: Some(serde_json::json!({"waited_ms": duration_ms})),
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
            message: "always healthy".to_owned(),
            latency_ms: Some(0),
            checked_at: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_waits_over_the_cap() {
        let adapter = WaitAdapter;
        let params = serde_json::json!({"duration_ms": 120_000});
        assert!(adapter.validate_parameters(Action::Wait, &params).is_err());
    }

    #[test]
    fn simulation_mode_does_not_sleep() {
        let adapter = WaitAdapter;
        let params = serde_json::json!({"duration_ms": 5});
        let start = Instant::now();
        let result = adapter.execute(Action::Wait, &params, ExecutionMode::Simulation);
        assert!(result.success);
        assert!(start.elapsed().as_millis() < 5);
    }
}
