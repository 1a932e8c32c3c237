// crates/runbook-core/src/adapter.rs
// ============================================================================
// Module: Adapter Contract & Registry
// Description: Uniform action dispatch; per-adapter lifecycle, health, and a name+action index (§4.7).
// Purpose: Let the step executor call any vendor integration through one small trait.
// Dependencies: runbook-core::{action, runbook}
// ============================================================================

//! The trait mirrors the shape of a small `Send + Sync` trait object held
//! behind a name, the pattern the teacher's provider registry uses for
//! evidence providers (`BTreeMap<String, Box<dyn EvidenceProvider>>` plus
//! a capability check before dispatch). Adapters never throw: every
//! outcome, success or failure, is the data in an [`AdapterResult`] or
//! [`AdapterError`] (§4.7 "errors carry ... and must be data, not
//! exceptions").

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use serde_json::Value;

use crate::action::Action;
use crate::errors::Component;
use crate::errors::StableError;
use crate::runbook::ExecutionMode;

/// A structured, data-not-exception adapter error (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    /// Stable error code (`auth`, `timeout`, `rate_limit`, `api`, `not_found`, `unknown`, ...).
    pub code: String,
    /// Human-facing message.
    pub message: String,
    /// The adapter that produced this error.
    pub adapter: String,
    /// The action that was being attempted.
    pub action: Action,
    /// Whether the retry wrapper should retry this error (§4.4).
    pub retryable: bool,
    /// The step this error occurred within, if known at the adapter layer.
    pub step_id: Option<String>,
    /// For rate-limit errors, the minimum delay the caller should wait
    /// before retrying, raising the retry wrapper's computed backoff
    /// floor when larger (§4.4 "Rate-limit errors may raise the floor").
    pub retry_after_ms: Option<u64>,
}

impl StableError for AdapterError {
    fn code(&self) -> &'static str {
        // Adapter error codes are adapter-defined strings (§7), but every
        // code this crate's own adapters emit is one of these constants;
        // unrecognized codes fall back to "unknown" for the stable-code contract.
        match self.code.as_str() {
            "auth" => "adapter_auth",
            "timeout" => "adapter_timeout",
            "rate_limit" => "adapter_rate_limit",
            "api" => "adapter_api",
            "not_found" => "adapter_not_found",
            _ => "adapter_unknown",
        }
    }

    fn component(&self) -> Component {
        Component::Adapter
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.adapter, self.message, self.code)
    }
}

impl std::error::Error for AdapterError {}

/// The structured result every [`Adapter::execute`] call returns (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// The action that was invoked.
    pub action: Action,
    /// The adapter that ran it.
    pub executor: String,
    /// Wall-clock duration of the call, milliseconds.
    pub duration_ms: u64,
    /// Opaque output, present on success.
    pub output: Option<Value>,
    /// Structured error, present on failure.
    pub error: Option<AdapterError>,
    /// Adapter-supplied metadata.
    pub metadata: Option<Value>,
}

/// Health status reported by [`Adapter::health_check`] (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The adapter is fully operational.
    Healthy,
    /// The adapter is reachable but impaired.
    Degraded,
    /// The adapter cannot service requests.
    Unhealthy,
    /// Health could not be determined.
    Unknown,
}

/// Result of an [`Adapter::health_check`] call (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    /// Current status.
    pub status: HealthStatus,
    /// Human-facing detail.
    pub message: String,
    /// Round-trip latency of the check, if measured.
    pub latency_ms: Option<u64>,
    /// ISO-8601 time the check ran.
    pub checked_at: String,
}

/// Static capability description an adapter advertises to the registry (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Whether [`Adapter::validate_parameters`] should be called before
    /// dispatch. `false` lets an adapter opt out entirely.
    pub supports_validation: bool,
    /// Per-adapter concurrency ceiling; `0` means unlimited (§4.7, §5).
    pub max_concurrency: u32,
}

/// The uniform contract every vendor integration implements (§4.7).
///
/// Implementers may use an interface abstraction or tagged variants
/// internally so long as this contract is honored and every error is
/// data, never a panic or an unhandled exception.
pub trait Adapter: Send + Sync {
    /// Stable adapter name, used as the registry key.
    fn name(&self) -> &str;
    /// Adapter version string.
    fn version(&self) -> &str;
    /// Actions this adapter can execute.
    fn supported_actions(&self) -> &[Action];
    /// Validates `params` for `action` without making any external call.
    /// Skipped by the step executor when [`AdapterCapabilities::supports_validation`] is `false`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the parameters are invalid for the action.
    fn validate_parameters(&self, action: Action, params: &Value) -> Result<(), AdapterError>;
    /// Executes `action` with `params` under `mode`. Must honor all three
    /// modes: `dry-run` (validate only), `simulation` (synthesize
    /// plausible output), `production` (perform the action). Never
    /// panics or throws; every outcome is encoded in the returned result.
    fn execute(&self, action: Action, params: &Value, mode: ExecutionMode) -> AdapterResult;
    /// Static capabilities advertised to the registry.
    fn capabilities(&self) -> AdapterCapabilities;
    /// Checks adapter health without performing the underlying action.
    fn health_check(&self) -> HealthReport;
    /// Attempts to reverse the effect of a previously-executed action.
    /// Returns `None` when this adapter does not support rollback for
    /// `action`.
    fn rollback(&self, _action: Action, _params: &Value) -> Option<Result<AdapterResult, AdapterError>> {
        None
    }
    /// Releases any resources the adapter holds. Best-effort; the
    /// registry swallows failures here (§4.7 "`shutdownAll` ... swallows
    /// per-adapter failures").
    ///
    /// # Errors
    ///
    /// May return [`AdapterError`] if cleanup fails; callers are not
    /// required to treat this as fatal.
    fn shutdown(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// A problem registering, looking up, or unregistering an adapter (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// An adapter with this name is already registered.
    #[error("adapter already registered: {0}")]
    DuplicateName(String),
    /// No adapter is registered under this name.
    #[error("no adapter registered with name: {0}")]
    UnknownAdapter(String),
    /// No adapter registered under this name supports the requested action.
    #[error("no adapter named {0} supports action {1}")]
    UnsupportedAction(String, Action),
}

/// Holds adapters keyed by name, plus an action -> adapter-names index (§4.7).
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Box<dyn Adapter>>,
    action_index: HashMap<Action, BTreeSet<String>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under its own `name()`. Fails if the name is
    /// already taken (§4.7 "`register` requires a unique name").
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is taken.
    pub fn register(&mut self, adapter: Box<dyn Adapter>) -> Result<(), RegistryError> {
        let name = adapter.name().to_owned();
        if self.adapters.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        for action in adapter.supported_actions() {
            self.action_index.entry(*action).or_default().insert(name.clone());
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    /// Unregisters the adapter named `name`, calling its `shutdown` hook
    /// first and swallowing any failure from it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownAdapter`] if no such adapter is registered.
    pub fn unregister(&mut self, name: &str) -> Result<(), RegistryError> {
        let adapter = self
            .adapters
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownAdapter(name.to_owned()))?;
        let _ = adapter.shutdown();
        for names in self.action_index.values_mut() {
            names.remove(name);
        }
        Ok(())
    }

    /// Looks up an adapter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Adapter> {
        self.adapters.get(name).map(std::convert::AsRef::as_ref)
    }

    /// Returns every adapter name registered for `action`.
    #[must_use]
    pub fn adapters_for_action(&self, action: Action) -> Vec<&str> {
        self.action_index
            .get(&action)
            .map(|names| names.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns every registered adapter name.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Runs `health_check` against every registered adapter concurrently
    /// (§4.7 "`healthCheckAll` fans out concurrently"), capturing a panic
    /// or otherwise-failed check as an `Unhealthy` result rather than
    /// propagating it.
    #[must_use]
    pub fn health_check_all(&self) -> BTreeMap<String, HealthReport> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .adapters
                .iter()
                .map(|(name, adapter)| {
                    let handle = scope.spawn(move || adapter.health_check());
                    (name.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let report = handle.join().unwrap_or_else(|_| HealthReport {
                        status: HealthStatus::Unhealthy,
                        message: "health check panicked".to_owned(),
                        latency_ms: None,
                        checked_at: String::new(),
                    });
                    (name, report)
                })
                .collect()
        })
    }

    /// Shuts down every registered adapter, best-effort (§4.7 "`shutdownAll`
    /// is best-effort and swallows per-adapter failures").
    pub fn shutdown_all(&mut self) {
        for adapter in self.adapters.values() {
            let _ = adapter.shutdown();
        }
    }
}
