// crates/runbook-ingest/src/file_ingest.rs
// ============================================================================
// Module: Stdin/File Ingestion
// Description: Parses a single JSON object, a JSON array, or NDJSON (§4.10).
// Purpose: Let the CLI feed alerts from a file or piped stdin.
// Dependencies: runbook-core::alert, serde_json
// ============================================================================

//! The format is detected heuristically: a payload containing a newline
//! that does not start with `[` and whose first non-empty line parses as
//! a JSON object is treated as NDJSON; everything else is parsed as a
//! single JSON value (object or array). NDJSON failures are reported
//! per line rather than aborting the whole batch, so one malformed line
//! doesn't discard the alerts around it.

use serde_json::Value;

use runbook_core::alert::AlertEvent;

use crate::error::IngestError;

const LINE_SNIPPET_LEN: usize = 200;

/// One parsed item from a stdin/file batch, or the error encountered parsing it.
pub type IngestItem = Result<AlertEvent, IngestError>;

/// Parses `input` as a single JSON object, a JSON array of alerts, or NDJSON.
///
/// # Errors
///
/// Returns one `Err` per line/item that failed to parse or validate;
/// valid items are still returned alongside them.
#[must_use]
pub fn parse_batch(input: &str) -> Vec<IngestItem> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if looks_like_ndjson(trimmed) {
        return parse_ndjson(input);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.iter().map(parse_alert_value).collect(),
        Ok(value) => vec![parse_alert_value(&value)],
        Err(err) => vec![Err(IngestError::MalformedJson(err.to_string()))],
    }
}

fn looks_like_ndjson(trimmed: &str) -> bool {
    if trimmed.starts_with('[') {
        return false;
    }
    let Some(first_line) = trimmed.lines().find(|line| !line.trim().is_empty()) else {
        return false;
    };
    if !trimmed.contains('\n') {
        return false;
    }
    serde_json::from_str::<Value>(first_line.trim()).is_ok_and(|v| v.is_object())
}

fn parse_ndjson(input: &str) -> Vec<IngestItem> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_line(line.trim()))
        .collect()
}

fn parse_line(line: &str) -> IngestItem {
    let value: Value = serde_json::from_str(line)
        .map_err(|err| IngestError::MalformedJson(format!("{err} (line: {})", snippet(line))))?;
    parse_alert_value(&value)
}

fn parse_alert_value(value: &Value) -> IngestItem {
    AlertEvent::from_json_value(value).map_err(|err| IngestError::InvalidAlert(err.to_string()))
}

fn snippet(line: &str) -> String {
    if line.len() <= LINE_SNIPPET_LEN {
        line.to_owned()
    } else {
        line.chars().take(LINE_SNIPPET_LEN).collect()
    }
}
