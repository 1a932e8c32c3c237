// crates/runbook-adapters/src/mock_siem.rs
// ============================================================================
// Module: Mock SIEM Adapter
// Description: Reference adapter for log-collection and SIEM-query actions.
// Purpose: Let `collect_logs`/`query_siem` steps run without a real SIEM.
// Dependencies: runbook-core::adapter
// ============================================================================

//! Returns a fixed, configurable hit count so a read-only scenario like
//! "one `collect_logs` step returning two hits" can run deterministically
//! in tests and demos. All three actions are read actions; every mode
//! behaves identically since there is no external effect to simulate away.

use serde_json::Value;
use std::time::Instant;

use runbook_core::action::Action;
use runbook_core::adapter::Adapter;
use runbook_core::adapter::AdapterCapabilities;
use runbook_core::adapter::AdapterError;
use runbook_core::adapter::AdapterResult;
use runbook_core::adapter::HealthReport;
use runbook_core::adapter::HealthStatus;
use runbook_core::runbook::ExecutionMode;

const SUPPORTED: [Action; 2] = [Action::CollectLogs, Action::QuerySiem];

/// Adapter that answers `collect_logs`/`query_siem` with a deterministic hit count.
pub struct MockSiemAdapter {
    event_count: u64,
}

impl MockSiemAdapter {
    /// Builds an adapter that reports `event_count` hits for every query.
    #[must_use]
    pub fn new(event_count: u64) -> Self {
        Self { event_count }
    }
}

impl Default for MockSiemAdapter {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Adapter for MockSiemAdapter {
    fn name(&self) -> &str {
        "mock-siem"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn supported_actions(&self) -> &[Action] {
        &SUPPORTED
    }

    fn validate_parameters(&self, _action: Action, params: &Value) -> Result<(), AdapterError> {
        if params.is_object() || params.is_null() {
            Ok(())
        } else {
            Err(AdapterError {
                code: "api".to_owned(),
                message: "params must be an object".to_owned(),
                adapter: self.name().to_owned(),
                action: Action::QuerySiem,
                retryable: false,
                step_id: None,
                retry_after_ms: None,
            })
        }
    }

    fn execute(&self, action: Action, params: &Value, _mode: ExecutionMode) -> AdapterResult {
        let start = Instant::now();
        let query = params.get("query").and_then(Value::as_str).unwrap_or("*").to_owned();
        AdapterResult {
            success: true,
            action,
            executor: self.name().to_owned(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            output: Some(serde_json::json!({
                "event_count": self.event_count,
                "query": query,
            })),
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
            message: "mock siem always healthy".to_owned(),
            latency_ms: Some(0),
            checked_at: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_logs_reports_configured_event_count() {
        let adapter = MockSiemAdapter::new(2);
        let result = adapter.execute(Action::CollectLogs, &serde_json::json!({}), ExecutionMode::Production);
        assert!(result.success);
        assert_eq!(result.output.unwrap()["event_count"], 2);
    }
}
