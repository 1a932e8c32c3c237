// crates/runbook-core/src/loader.rs
// ============================================================================
// Module: Playbook Loader & Validator
// Description: Parses runbook YAML, enforces schema and structural invariants.
// Purpose: Give the orchestrator a single typed, validated Runbook (§4.1).
// Dependencies: serde_yaml, runbook-core::runbook
// ============================================================================

//! All errors are returned, never thrown: [`load_str`] and [`load_path`]
//! always hand back a `Result` whose `Err` enumerates every violation
//! found, not just the first. File-path loads are cached keyed by
//! absolute path; string loads are never cached, since there is no
//! stable key to cache them under.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;

use crate::errors::Component;
use crate::errors::StableError;
use crate::runbook::AutomationLevel;
use crate::runbook::Runbook;
use crate::runbook::RunbookInvariantError;

/// Top-level YAML wrapper (§6.3): `runbook: { ... }`.
#[derive(Debug, Deserialize)]
struct RunbookDocument {
    runbook: Runbook,
}

/// A schema or structural problem found while loading a runbook.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The document could not be parsed as YAML, or its shape didn't match the schema.
    #[error("playbook schema error: {0}")]
    Schema(String),
    /// One or more structural invariants (§3) were violated.
    #[error("playbook failed {} structural invariant(s)", .0.len())]
    Invariants(Vec<RunbookInvariantError>),
    /// The file could not be read from disk.
    #[error("failed to read playbook file: {0}")]
    Io(String),
}

impl StableError for LoadError {
    fn code(&self) -> &'static str {
        match self {
            Self::Schema(_) => "playbook_schema_invalid",
            Self::Invariants(_) => "playbook_invariant_violated",
            Self::Io(_) => "playbook_io_error",
        }
    }

    fn component(&self) -> Component {
        Component::Engine
    }
}

/// Lightweight metadata extracted by [`list_directory`] without full validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunbookSummary {
    /// Path the summary was extracted from.
    pub path: PathBuf,
    /// Runbook name, if present and a string.
    pub name: Option<String>,
    /// Runbook version, if present and a string.
    pub version: Option<String>,
    /// Automation level, if present and recognized.
    pub automation_level: Option<AutomationLevel>,
}

/// Parses a runbook from a YAML string and validates it fully (§4.1).
///
/// This path is never cached: there is no stable key to cache a string
/// load under, and callers that want caching should use [`load_path`].
///
/// # Errors
///
/// Returns [`LoadError::Schema`] when the YAML fails to parse or match
/// the runbook shape, or [`LoadError::Invariants`] when the parsed
/// runbook violates one or more structural invariants (§3).
pub fn load_str(yaml: &str) -> Result<Runbook, LoadError> {
    let lenient = normalize_lenient_yaml(yaml);
    let document: RunbookDocument =
        serde_yaml::from_str(&lenient).map_err(|err| LoadError::Schema(err.to_string()))?;

    let violations = document.runbook.check_invariants();
    if !violations.is_empty() {
        return Err(LoadError::Invariants(violations));
    }

    Ok(document.runbook)
}

/// Trims trailing whitespace from each line and strips a trailing slash
/// from `---` document markers, matching the lenient parsing called for
/// in §4.1 ("lenient to trailing slashes, whitespace").
fn normalize_lenient_yaml(yaml: &str) -> String {
    yaml.lines()
        .map(|line| {
            let trimmed_end = line.trim_end();
            trimmed_end.strip_suffix('/').unwrap_or(trimmed_end)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cache of validated runbooks keyed by absolute file path (§4.1).
///
/// Holds only successfully validated runbooks; a failed load is never
/// cached, so a subsequent fix-and-retry on the same path is picked up.
#[derive(Default)]
pub struct LoaderCache {
    entries: Mutex<HashMap<PathBuf, Runbook>>,
}

impl LoaderCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates the runbook at `path`, serving a cached copy
    /// when the absolute path has been loaded successfully before.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] under the same conditions as [`load_str`],
    /// plus [`LoadError::Io`] if the file cannot be read or its path
    /// cannot be canonicalized.
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<Runbook, LoadError> {
        let absolute = fs::canonicalize(path.as_ref())
            .map_err(|err| LoadError::Io(err.to_string()))?;

        if let Some(cached) = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&absolute)
        {
            return Ok(cached.clone());
        }

        let contents = fs::read_to_string(&absolute).map_err(|err| LoadError::Io(err.to_string()))?;
        let runbook = load_str(&contents)?;

        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(absolute, runbook.clone());
        Ok(runbook)
    }

    /// Removes every cached entry. Tests and hot-reload tooling use this
    /// to force a re-read from disk.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

/// Loads and fully validates a single playbook file, bypassing the cache.
///
/// # Errors
///
/// See [`load_str`] and [`LoadError::Io`].
pub fn load_path_uncached(path: impl AsRef<Path>) -> Result<Runbook, LoadError> {
    let contents = fs::read_to_string(path.as_ref()).map_err(|err| LoadError::Io(err.to_string()))?;
    load_str(&contents)
}

/// Scans `dir` for `.yml`/`.yaml` files and extracts lightweight
/// metadata without full validation (§4.1). Unreadable or unparsable
/// files are skipped silently: this is a best-effort listing for
/// dashboards and CLI `ls`-style commands, not a validation pass.
#[must_use]
pub fn list_directory(dir: impl AsRef<Path>) -> Vec<RunbookSummary> {
    let Ok(entries) = fs::read_dir(dir.as_ref()) else {
        return Vec::new();
    };

    let mut summaries = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        if !is_yaml {
            continue;
        }

        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&contents) else {
            continue;
        };
        let Some(runbook) = value.get("runbook") else {
            continue;
        };

        let name = runbook
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_owned);
        let version = runbook
            .get("version")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_owned);
        let automation_level = runbook
            .get("config")
            .and_then(|c| c.get("automation_level"))
            .and_then(serde_yaml::Value::as_str)
            .and_then(|level| match level {
                "L0" => Some(AutomationLevel::L0),
                "L1" => Some(AutomationLevel::L1),
                "L2" => Some(AutomationLevel::L2),
                _ => None,
            });

        summaries.push(RunbookSummary {
            path,
            name,
            version,
            automation_level,
        });
    }

    summaries
}
