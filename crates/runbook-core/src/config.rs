// crates/runbook-core/src/config.rs
// ============================================================================
// Module: Engine Configuration
// Description: Typed view over the process environment surface (§6.7).
// Purpose: Give the core a single place to read its own env vars, with defaults.
// Dependencies: std::env
// ============================================================================

//! The CLI surface and config loader are out of scope for this crate (§1),
//! but the core still needs a typed view of the environment variables it
//! recognizes (§6.7). This module reads them directly rather than pulling
//! in a config-file crate that nothing else in the workspace needs.

use std::env;

use crate::runbook::AutomationLevel;

const ENV_LOG_LEVEL: &str = "RUNBOOK_LOG_LEVEL";
const ENV_DB_PATH: &str = "RUNBOOK_DB_PATH";
const ENV_PLAYBOOK_DIR: &str = "RUNBOOK_PLAYBOOK_DIR";
const ENV_ADAPTER_DIR: &str = "RUNBOOK_ADAPTER_DIR";
const ENV_DEFAULT_LEVEL: &str = "RUNBOOK_DEFAULT_LEVEL";
const ENV_WEBHOOK_HOST: &str = "RUNBOOK_WEBHOOK_HOST";
const ENV_WEBHOOK_PORT: &str = "RUNBOOK_WEBHOOK_PORT";
const ENV_HMAC_SECRET: &str = "RUNBOOK_HMAC_SECRET";
const ENV_LLM_ENDPOINT: &str = "RUNBOOK_LLM_ENDPOINT";
const ENV_LLM_API_KEY: &str = "RUNBOOK_LLM_API_KEY";
const ENV_LLM_MODEL: &str = "RUNBOOK_LLM_MODEL";
const ENV_LLM_TIMEOUT_MS: &str = "RUNBOOK_LLM_TIMEOUT_MS";
const ENV_LLM_MAX_TOKENS: &str = "RUNBOOK_LLM_MAX_TOKENS";

const DEFAULT_DB_PATH: &str = "runbook.db";
const DEFAULT_PLAYBOOK_DIR: &str = "./playbooks";
const DEFAULT_ADAPTER_DIR: &str = "./adapters";
const DEFAULT_WEBHOOK_HOST: &str = "127.0.0.1";
const DEFAULT_WEBHOOK_PORT: u16 = 8088;
const DEFAULT_LLM_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_LLM_MAX_TOKENS: u32 = 512;

/// Optional LLM enrichment settings (§6.7). Absence of an endpoint or key
/// disables LLM enrichment entirely; the orchestrator never blocks on it
/// either way (§1 "Out of scope", §7 "LLM errors ... never influence
/// control flow").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// Base URL of the LLM endpoint.
    pub endpoint: String,
    /// API key for the endpoint.
    pub api_key: String,
    /// Model identifier to request.
    pub model: String,
    /// Request timeout, milliseconds.
    pub timeout_ms: u64,
    /// Maximum tokens to request per call.
    pub max_tokens: u32,
}

/// Typed view of the environment variables the core recognizes (§6.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tracing filter directive (e.g. `info`, `runbook_core=debug`).
    pub log_level: String,
    /// Path to the durable store database file.
    pub database_path: String,
    /// Directory scanned for playbook files.
    pub playbook_dir: String,
    /// Directory scanned for adapter configuration.
    pub adapter_dir: String,
    /// Automation level applied when a request does not specify one.
    pub default_automation_level: AutomationLevel,
    /// Webhook bind host.
    pub webhook_host: String,
    /// Webhook bind port.
    pub webhook_port: u16,
    /// Shared secret for webhook HMAC verification, if configured.
    pub hmac_secret: Option<String>,
    /// LLM enrichment settings, present only when endpoint and key are both set.
    pub llm: Option<LlmConfig>,
}

impl EngineConfig {
    /// Reads configuration from the process environment, applying
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            log_level: env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_owned()),
            database_path: env::var(ENV_DB_PATH).unwrap_or_else(|_| DEFAULT_DB_PATH.to_owned()),
            playbook_dir: env::var(ENV_PLAYBOOK_DIR)
                .unwrap_or_else(|_| DEFAULT_PLAYBOOK_DIR.to_owned()),
            adapter_dir: env::var(ENV_ADAPTER_DIR)
                .unwrap_or_else(|_| DEFAULT_ADAPTER_DIR.to_owned()),
            default_automation_level: env::var(ENV_DEFAULT_LEVEL)
                .ok()
                .and_then(|raw| parse_level(&raw))
                .unwrap_or(AutomationLevel::L0),
            webhook_host: env::var(ENV_WEBHOOK_HOST)
                .unwrap_or_else(|_| DEFAULT_WEBHOOK_HOST.to_owned()),
            webhook_port: env::var(ENV_WEBHOOK_PORT)
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_WEBHOOK_PORT),
            hmac_secret: env::var(ENV_HMAC_SECRET).ok().filter(|s| !s.is_empty()),
            llm: llm_config_from_env(),
        }
    }
}

fn parse_level(raw: &str) -> Option<AutomationLevel> {
    match raw {
        "L0" => Some(AutomationLevel::L0),
        "L1" => Some(AutomationLevel::L1),
        "L2" => Some(AutomationLevel::L2),
        _ => None,
    }
}

fn llm_config_from_env() -> Option<LlmConfig> {
    let endpoint = env::var(ENV_LLM_ENDPOINT).ok().filter(|s| !s.is_empty())?;
    let api_key = env::var(ENV_LLM_API_KEY).ok().filter(|s| !s.is_empty())?;
    let model = env::var(ENV_LLM_MODEL).unwrap_or_else(|_| "default".to_owned());
    let timeout_ms = env::var(ENV_LLM_TIMEOUT_MS)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_LLM_TIMEOUT_MS);
    let max_tokens = env::var(ENV_LLM_MAX_TOKENS)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_LLM_MAX_TOKENS);
    Some(LlmConfig {
        endpoint,
        api_key,
        model,
        timeout_ms,
        max_tokens,
    })
}

#[cfg(test)]
#[allow(unsafe_code, reason = "tests mutate process env to exercise config parsing")]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // SAFETY: tests that mutate process environment serialize on this lock
    // so they don't race with each other (env vars are process-global).
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for key in [
            ENV_LOG_LEVEL,
            ENV_DB_PATH,
            ENV_WEBHOOK_PORT,
            ENV_LLM_ENDPOINT,
            ENV_LLM_API_KEY,
        ] {
            unsafe {
                env::remove_var(key);
            }
        }
        let config = EngineConfig::from_env();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.database_path, DEFAULT_DB_PATH);
        assert_eq!(config.webhook_port, DEFAULT_WEBHOOK_PORT);
        assert!(config.llm.is_none());
    }

    #[test]
    fn llm_config_absent_unless_both_endpoint_and_key_set() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var(ENV_LLM_ENDPOINT, "https://llm.example.com");
            env::remove_var(ENV_LLM_API_KEY);
        }
        assert!(EngineConfig::from_env().llm.is_none());
        unsafe {
            env::set_var(ENV_LLM_API_KEY, "secret");
        }
        assert!(EngineConfig::from_env().llm.is_some());
        unsafe {
            env::remove_var(ENV_LLM_ENDPOINT);
            env::remove_var(ENV_LLM_API_KEY);
        }
    }

    #[test]
    fn default_automation_level_parses_known_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var(ENV_DEFAULT_LEVEL, "L2");
        }
        assert_eq!(EngineConfig::from_env().default_automation_level, AutomationLevel::L2);
        unsafe {
            env::remove_var(ENV_DEFAULT_LEVEL);
        }
    }
}
