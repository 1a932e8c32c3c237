// crates/runbook-ingest/src/error.rs
// ============================================================================
// Module: Ingestion Errors
// Description: Stable error taxonomy for the webhook and file/stdin front door.
// Purpose: Give ingestion failures a code and component attribution (§7).
// Dependencies: runbook-core::errors
// ============================================================================

use runbook_core::errors::Component;
use runbook_core::errors::StableError;

/// A failure ingesting an alert, whether from the webhook or file/stdin path (§4.10).
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    /// The `x-detectforge-signature` header was missing or did not match.
    #[error("invalid signature")]
    InvalidSignature,
    /// The request or line body was not valid UTF-8 JSON.
    #[error("malformed json: {0}")]
    MalformedJson(String),
    /// The payload parsed as JSON but failed minimum alert validity (§3, §6.1).
    #[error("invalid alert: {0}")]
    InvalidAlert(String),
    /// The orchestrator callback returned an error handling an otherwise-valid alert.
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

impl StableError for IngestError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "ingest_invalid_signature",
            Self::MalformedJson(_) => "ingest_malformed_json",
            Self::InvalidAlert(_) => "ingest_invalid_alert",
            Self::HandlerFailed(_) => "ingest_handler_failed",
        }
    }

    fn component(&self) -> Component {
        Component::Ingest
    }
}
