// crates/runbook-core/src/alert.rs
// ============================================================================
// Module: Alert Event
// Description: Wire format for normalized alert events from the detection pipeline.
// Purpose: Deserialize and minimally validate inbound alerts (§3, §6.1).
// Dependencies: serde, serde_json
// ============================================================================

//! `AlertEvent` is the only contract between this core and the upstream
//! detection system (§1 "Out of scope"). Minimum validity is deliberately
//! loose: a non-empty `@timestamp` string and an `event` object. Everything
//! else is optional and ignored if absent, so the core never rejects an
//! alert for carrying fields it doesn't understand.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Kind of observation the alert represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A security alert requiring triage.
    Alert,
    /// A generic event.
    Event,
    /// A metric observation.
    Metric,
}

/// Confidence level reported by the detection pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Low confidence.
    Low,
    /// Medium confidence.
    Medium,
    /// High confidence.
    High,
}

/// The `event` block of an alert (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBlock {
    /// Event kind.
    pub kind: EventKind,
    /// ECS-style category strings (e.g. `["malware"]`).
    #[serde(default)]
    pub category: Vec<String>,
    /// ECS-style type strings (e.g. `["info"]`).
    #[serde(default)]
    pub r#type: Vec<String>,
    /// Severity on a 0-100 scale.
    pub severity: f64,
    /// Optional outcome (`success`, `failure`, `unknown`).
    pub outcome: Option<String>,
    /// Optional upstream risk score.
    pub risk_score: Option<f64>,
}

/// Host block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostBlock {
    /// Host identifier.
    pub id: Option<String>,
    /// Hostname.
    pub name: Option<String>,
    /// IP addresses associated with the host.
    #[serde(default)]
    pub ip: Vec<String>,
    /// Operating system platform.
    pub os: Option<String>,
}

/// Network endpoint (source or destination).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkEndpoint {
    /// IP address.
    pub ip: Option<String>,
    /// Port number.
    pub port: Option<u16>,
    /// Domain name, if resolved.
    pub domain: Option<String>,
}

/// Process block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcessBlock {
    /// Process id.
    pub pid: Option<u64>,
    /// Process name.
    pub name: Option<String>,
    /// Full command line.
    pub command_line: Option<String>,
    /// SHA-256 hash of the process image.
    pub hash_sha256: Option<String>,
}

/// File block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileBlock {
    /// Absolute file path.
    pub path: Option<String>,
    /// File name.
    pub name: Option<String>,
    /// SHA-256 hash of file contents.
    pub hash_sha256: Option<String>,
}

/// User block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserBlock {
    /// User identifier.
    pub id: Option<String>,
    /// User name.
    pub name: Option<String>,
    /// Domain the user belongs to.
    pub domain: Option<String>,
}

/// A single MITRE ATT&CK technique or tactic reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttckRef {
    /// Identifier, e.g. `T1059` or `T1059.001`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// Indicator of compromise referenced by the threat block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Indicator {
    /// Indicator type (`ip`, `domain`, `file-hash`, ...).
    pub r#type: Option<String>,
    /// Indicator value.
    pub value: Option<String>,
}

/// Threat intelligence block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatBlock {
    /// Always `"MITRE ATT&CK"` in this schema.
    pub framework: String,
    /// Matched techniques.
    #[serde(default)]
    pub technique: Vec<AttckRef>,
    /// Matched tactics.
    #[serde(default)]
    pub tactic: Vec<AttckRef>,
    /// Optional associated indicator.
    pub indicator: Option<Indicator>,
}

/// Detection-pipeline metadata (`x-detectforge` in the wire format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMeta {
    /// Detection rule identifier.
    pub rule_id: String,
    /// Detection rule name.
    pub rule_name: String,
    /// Detection rule version.
    pub rule_version: String,
    /// When the detection was generated (ISO-8601).
    pub generated_at: String,
    /// Detection confidence.
    pub confidence: Confidence,
    /// Runbook suggested by the detection pipeline, if any.
    pub suggested_runbook: Option<String>,
}

/// A normalized alert event (§3, §6.1).
///
/// # Invariants
/// - `timestamp` is a non-empty string.
/// - `event` deserializes as an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// ISO-8601 timestamp.
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    /// Event classification block.
    pub event: EventBlock,
    /// Host the alert concerns.
    pub host: Option<HostBlock>,
    /// Network source endpoint.
    pub source: Option<NetworkEndpoint>,
    /// Network destination endpoint.
    pub destination: Option<NetworkEndpoint>,
    /// Process involved in the alert.
    pub process: Option<ProcessBlock>,
    /// File involved in the alert.
    pub file: Option<FileBlock>,
    /// User involved in the alert.
    pub user: Option<UserBlock>,
    /// Threat intelligence context.
    pub threat: Option<ThreatBlock>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Detection-pipeline metadata.
    #[serde(rename = "x-detectforge")]
    pub detection_meta: Option<DetectionMeta>,
}

/// Error returned when an alert payload fails minimum validity (§3, §6.1).
#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertValidationError {
    /// The payload was not a JSON object at all.
    #[error("alert payload must be a JSON object")]
    NotAnObject,
    /// `@timestamp` was missing, non-string, or empty.
    #[error("@timestamp must be a non-empty string")]
    MissingTimestamp,
    /// `event` was missing or not an object.
    #[error("event must be an object")]
    MissingEventObject,
    /// The payload did not match the `AlertEvent` shape.
    #[error("alert payload does not match expected shape: {0}")]
    Malformed(String),
}

impl AlertEvent {
    /// Parses and validates a raw JSON alert payload against minimum
    /// validity rules (§3): `@timestamp` is a non-empty string and
    /// `event` is an object. All other fields are optional.
    ///
    /// # Errors
    ///
    /// Returns [`AlertValidationError`] when the payload fails minimum
    /// validity or does not match the expected shape.
    pub fn from_json_value(value: &Value) -> Result<Self, AlertValidationError> {
        let object = value.as_object().ok_or(AlertValidationError::NotAnObject)?;

        let timestamp_ok = object
            .get("@timestamp")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !timestamp_ok {
            return Err(AlertValidationError::MissingTimestamp);
        }

        if !object.get("event").is_some_and(Value::is_object) {
            return Err(AlertValidationError::MissingEventObject);
        }

        serde_json::from_value(value.clone())
            .map_err(|err| AlertValidationError::Malformed(err.to_string()))
    }

    /// Returns the MITRE ATT&CK technique ids referenced by this alert, if any.
    #[must_use]
    pub fn technique_ids(&self) -> Vec<&str> {
        self.threat
            .as_ref()
            .map(|t| t.technique.iter().map(|r| r.id.as_str()).collect())
            .unwrap_or_default()
    }
}
