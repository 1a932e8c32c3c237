// crates/runbook-adapters/src/http.rs
// ============================================================================
// Module: HTTP Adapter
// Description: Generic bounded HTTP adapter for the `http_request` action.
// Purpose: Let a runbook step issue a GET/POST without a vendor-specific adapter.
// Dependencies: runbook-core::adapter, reqwest
// ============================================================================

//! Enforces the same fail-closed posture the teacher's HTTP evidence
//! provider applies to evidence queries: HTTPS only unless explicitly
//! relaxed, no redirects followed, an optional host allowlist, and a
//! response-size ceiling. `production` mode performs the call;
//! `simulation` synthesizes a plausible response without leaving the
//! process; `dry-run` only validates parameters.

use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;
use std::time::Instant;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde_json::Value;

use runbook_core::action::Action;
use runbook_core::adapter::Adapter;
use runbook_core::adapter::AdapterCapabilities;
use runbook_core::adapter::AdapterError;
use runbook_core::adapter::AdapterResult;
use runbook_core::adapter::HealthReport;
use runbook_core::adapter::HealthStatus;
use runbook_core::runbook::ExecutionMode;

const SUPPORTED: [Action; 1] = [Action::HttpRequest];

/// Configuration for [`HttpAdapter::new`].
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    /// Allow cleartext HTTP. Disabled by default.
    pub allow_http: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum response body size accepted, in bytes.
    pub max_response_bytes: usize,
    /// Optional host allowlist; `None` allows any host (subject to scheme policy).
    pub allowed_hosts: Option<BTreeSet<String>>,
    /// User-Agent header sent on every request.
    pub user_agent: String,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            allow_http: false,
            timeout_ms: 5_000,
            max_response_bytes: 1024 * 1024,
            allowed_hosts: None,
            user_agent: "runbook-core/0.1".to_owned(),
        }
    }
}

/// Adapter dispatching the `http_request` action to an arbitrary HTTPS endpoint.
pub struct HttpAdapter {
    config: HttpAdapterConfig,
    client: Client,
}

impl HttpAdapter {
    /// Builds an adapter from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error string if the underlying HTTP client cannot be built.
    pub fn new(config: HttpAdapterConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self { config, client })
    }

    fn parse_request(&self, params: &Value) -> Result<(reqwest::Url, String), String> {
        let Value::Object(map) = params else {
            return Err("http_request params must be an object".to_owned());
        };
        let Some(Value::String(raw_url)) = map.get("url") else {
            return Err("missing required string param: url".to_owned());
        };
        let method = match map.get("method") {
            Some(Value::String(m)) => m.to_uppercase(),
            Some(_) => return Err("method param must be a string".to_owned()),
            None => "GET".to_owned(),
        };
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "DELETE" | "HEAD") {
            return Err(format!("unsupported http method: {method}"));
        }
        let url = reqwest::Url::parse(raw_url).map_err(|err| format!("invalid url: {err}"))?;
        match url.scheme() {
            "https" => {}
            "http" if self.config.allow_http => {}
            other => return Err(format!("unsupported url scheme: {other}")),
        }
        if let Some(allowlist) = &self.config.allowed_hosts {
            let host = url.host_str().ok_or_else(|| "url host required".to_owned())?;
            if !allowlist.contains(host) {
                return Err(format!("url host not allowed: {host}"));
            }
        }
        Ok((url, method))
    }

    fn read_body_limited(&self, response: reqwest::blocking::Response) -> Result<Vec<u8>, String> {
        let max = self.config.max_response_bytes;
        let mut handle = response.take(u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1));
        let mut buf = Vec::new();
        handle.read_to_end(&mut buf).map_err(|err| err.to_string())?;
        if buf.len() > max {
            return Err("http response exceeds size limit".to_owned());
        }
        Ok(buf)
    }

    fn adapter_error(&self, action: Action, code: &str, message: String, retryable: bool) -> AdapterError {
        AdapterError {
            code: code.to_owned(),
            message,
            adapter: self.name().to_owned(),
            action,
            retryable,
            step_id: None,
            retry_after_ms: None,
        }
    }
}

impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        "http"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn supported_actions(&self) -> &[Action] {
        &SUPPORTED
    }

    fn validate_parameters(&self, action: Action, params: &Value) -> Result<(), AdapterError> {
        self.parse_request(params)
            .map(|_| ())
            .map_err(|msg| self.adapter_error(action, "api", msg, false))
    }

    fn execute(&self, action: Action, params: &Value, mode: ExecutionMode) -> AdapterResult {
        let start = Instant::now();
        let (url, method) = match self.parse_request(params) {
            Ok(parsed) => parsed,
            Err(msg) => {
                return AdapterResult {
                    success: false,
                    action,
                    executor: self.name().to_owned(),
                    duration_ms: duration_since(start),
                    output: None,
                    error: Some(self.adapter_error(action, "api", msg, false)),
                    metadata: None,
                };
            }
        };

        if matches!(mode, ExecutionMode::DryRun) {
            return AdapterResult {
                success: true,
                action,
                executor: self.name().to_owned(),
                duration_ms: duration_since(start),
                output: Some(serde_json::json!({"validated": true, "url": url.as_str(), "method": method})),
                error: None,
                metadata: Some(serde_json::json!({"mode": "dry-run"})),
            };
        }

        if matches!(mode, ExecutionMode::Simulation) {
            return AdapterResult {
                success: true,
                action,
                executor: self.name().to_owned(),
                duration_ms: duration_since(start),
                output: Some(serde_json::json!({
                    "status": 200,
                    "url": url.as_str(),
                    "method": method,
                    "simulated": true,
                })),
                error: None,
                metadata: Some(serde_json::json!({"mode": "simulation"})),
            };
        }

        let request = self.client.request(
            method.parse().unwrap_or(reqwest::Method::GET),
            url.clone(),
        );
        match request.send() {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = match self.read_body_limited(response) {
                    Ok(body) => body,
                    Err(msg) => {
                        return AdapterResult {
                            success: false,
                            action,
                            executor: self.name().to_owned(),
                            duration_ms: duration_since(start),
                            output: None,
                            error: Some(self.adapter_error(action, "api", msg, false)),
                            metadata: None,
                        };
                    }
                };
                AdapterResult {
                    success: (200..400).contains(&status),
                    action,
                    executor: self.name().to_owned(),
                    duration_ms: duration_since(start),
                    output: Some(serde_json::json!({
                        "status": status,
                        "url": url.as_str(),
                        "method": method,
                        "body_bytes": body.len(),
                    })),
                    error: if (200..400).contains(&status) {
                        None
                    } else {
                        Some(self.adapter_error(
                            action,
                            "api",
                            format!("http status {status}"),
                            status >= 500,
                        ))
                    },
                    metadata: None,
                }
            }
            Err(err) => {
                let retryable = err.is_timeout() || err.is_connect();
                let code = if err.is_timeout() { "timeout" } else { "api" };
                AdapterResult {
                    success: false,
                    action,
                    executor: self.name().to_owned(),
                    duration_ms: duration_since(start),
                    output: None,
                    error: Some(self.adapter_error(action, code, err.to_string(), retryable)),
                    metadata: None,
                }
            }
        }
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities { supports_validation: true, max_concurrency: 0 }
    }

    fn health_check(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::Healthy,
            message: "http client ready".to_owned(),
            latency_ms: None,
            checked_at: String::new(),
        }
    }
}

fn duration_since(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
