// crates/runbook-adapters/src/mock_network.rs
// ============================================================================
// Module: Mock Network/EDR Adapter
// Description: Reference adapter for containment-style write actions.
// Purpose: Exercise the write-action path (approval gate, L2 queue, rollback)
//          without a real EDR or firewall.
// Dependencies: runbook-core::adapter
// ============================================================================

//! Covers the containment actions named in the end-to-end scenarios:
//! `isolate_host`/`restore_connectivity`, `block_ip`/`unblock_ip`,
//! `block_domain`/`unblock_domain`, `quarantine_file`/`restore_file`,
//! `disable_account`/`enable_account`, `kill_process`. Every call records
//! its target in an in-memory ledger so [`Adapter::rollback`] can look up
//! what a forward action did and undo it.

use std::collections::HashMap;
use std::sync::Mutex;
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

const SUPPORTED: [Action; 11] = [
    Action::IsolateHost,
    Action::RestoreConnectivity,
    Action::BlockIp,
    Action::UnblockIp,
    Action::BlockDomain,
    Action::UnblockDomain,
    Action::QuarantineFile,
    Action::RestoreFile,
    Action::DisableAccount,
    Action::EnableAccount,
    Action::KillProcess,
];

fn target_param(action: Action) -> &'static str {
    match action {
        Action::IsolateHost | Action::RestoreConnectivity => "host",
        Action::BlockIp | Action::UnblockIp => "ip",
        Action::BlockDomain | Action::UnblockDomain => "domain",
        Action::QuarantineFile | Action::RestoreFile => "path",
        Action::DisableAccount | Action::EnableAccount => "account",
        Action::KillProcess => "pid",
        _ => "target",
    }
}

fn contained_status(action: Action) -> &'static str {
    match action {
        Action::IsolateHost => "contained",
        Action::RestoreConnectivity => "restored",
        Action::BlockIp | Action::BlockDomain => "blocked",
        Action::UnblockIp | Action::UnblockDomain => "unblocked",
        Action::QuarantineFile => "quarantined",
        Action::RestoreFile => "restored",
        Action::DisableAccount => "disabled",
        Action::EnableAccount => "enabled",
        Action::KillProcess => "terminated",
        _ => "ok",
    }
}

fn inverse_action(action: Action) -> Option<Action> {
    match action {
        Action::IsolateHost => Some(Action::RestoreConnectivity),
        Action::BlockIp => Some(Action::UnblockIp),
        Action::BlockDomain => Some(Action::UnblockDomain),
        Action::QuarantineFile => Some(Action::RestoreFile),
        Action::DisableAccount => Some(Action::EnableAccount),
        _ => None,
    }
}

/// Adapter simulating containment actions against an in-memory ledger.
pub struct MockNetworkAdapter {
    ledger: Mutex<HashMap<String, Value>>,
}

impl MockNetworkAdapter {
    /// Builds an empty-ledger adapter.
    #[must_use]
    pub fn new() -> Self {
        Self { ledger: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.ledger.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn adapter_error(&self, action: Action, message: String) -> AdapterError {
        AdapterError {
            code: "api".to_owned(),
            message,
            adapter: self.name().to_owned(),
            action,
            retryable: false,
            step_id: None,
            retry_after_ms: None,
        }
    }
}

impl Default for MockNetworkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for MockNetworkAdapter {
    fn name(&self) -> &str {
        "mock-network"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn supported_actions(&self) -> &[Action] {
        &SUPPORTED
    }

    fn validate_parameters(&self, action: Action, params: &Value) -> Result<(), AdapterError> {
        let key = target_param(action);
        match params.get(key) {
            Some(Value::String(_)) => Ok(()),
            Some(Value::Number(_)) if key == "pid" => Ok(()),
            _ => Err(self.adapter_error(action, format!("missing required param: {key}"))),
        }
    }

    fn execute(&self, action: Action, params: &Value, mode: ExecutionMode) -> AdapterResult {
        let start = Instant::now();
        let key = target_param(action);
        let Some(target) = params.get(key) else {
            return AdapterResult {
                success: false,
                action,
                executor: self.name().to_owned(),
                duration_ms: 0,
                output: None,
                error: Some(self.adapter_error(action, format!("missing required param: {key}"))),
                metadata: None,
            };
        };
        let target_string = match target {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if matches!(mode, ExecutionMode::DryRun) {
            let mut output = serde_json::Map::new();
            output.insert("validated".to_owned(), Value::Bool(true));
            output.insert(key.to_owned(), Value::String(target_string));
            return AdapterResult {
                success: true,
                action,
                executor: self.name().to_owned(),
                duration_ms: elapsed_ms(start),
                output: Some(Value::Object(output)),
                error: None,
                metadata: Some(serde_json::json!({"mode": "dry-run"})),
            };
        }

        self.lock().insert(
            target_string.clone(),
            serde_json::json!({"action": action, "status": contained_status(action)}),
        );

        let mut output = serde_json::Map::new();
        output.insert("status".to_owned(), Value::String(contained_status(action).to_owned()));
        output.insert(key.to_owned(), Value::String(target_string));

        AdapterResult {
            success: true,
            action,
            executor: self.name().to_owned(),
            duration_ms: elapsed_ms(start),
            output: Some(Value::Object(output)),
            error: None,
            metadata: Some(serde_json::json!({"mode": mode_label(mode)})),
        }
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities { supports_validation: true, max_concurrency: 0 }
    }

    fn health_check(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::Healthy,
            message: "mock network control plane reachable".to_owned(),
            latency_ms: Some(0),
            checked_at: String::new(),
        }
    }

    fn rollback(&self, action: Action, params: &Value) -> Option<Result<AdapterResult, AdapterError>> {
        let inverse = inverse_action(action)?;
        let result = self.execute(inverse, params, ExecutionMode::Production);
        Some(Ok(result))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Production => "production",
        ExecutionMode::Simulation => "simulation",
        ExecutionMode::DryRun => "dry-run",
    }
}
