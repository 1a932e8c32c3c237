// crates/runbook-core/src/errors.rs
// ============================================================================
// Module: Error Taxonomy
// Description: Stable error codes, component attribution, and message sanitization.
// Purpose: Give every core error a programmatic code and a safe human-facing form.
// Dependencies: none
// ============================================================================

//! Every structured error in this crate carries a stable string code (§7)
//! and is attributed to the component that produced it. User-facing
//! messages are sanitized before leaving the process; audit records keep
//! the untouched internal detail.

/// Component that produced an error, per §7 "Surfaces".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// An adapter implementation.
    Adapter,
    /// The orchestration engine itself.
    Engine,
    /// The ingestion front door.
    Ingest,
    /// The policy enforcer.
    Policy,
}

impl Component {
    /// Returns the wire-form name of the component.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adapter => "adapter",
            Self::Engine => "engine",
            Self::Ingest => "ingest",
            Self::Policy => "policy",
        }
    }
}

/// Trait implemented by every structured error type in the workspace.
///
/// `code()` returns one of the stable string constants enumerated in §7;
/// `component()` attributes the error to the producing subsystem.
pub trait StableError {
    /// Stable, programmatic error code (never changes across releases).
    fn code(&self) -> &'static str;
    /// The component that produced this error.
    fn component(&self) -> Component;
}

/// Strips file paths, stack-frame-shaped lines, and collapses whitespace
/// from a message before it is shown to a user (§7 "Surfaces").
///
/// Audit records must use the untouched original message; only
/// user-facing surfaces call this.
#[must_use]
pub fn sanitize_message(message: &str) -> String {
    let without_paths = strip_path_like_tokens(message);
    let without_frames: Vec<&str> = without_paths
        .lines()
        .filter(|line| !looks_like_stack_frame(line))
        .collect();
    collapse_whitespace(&without_frames.join(" "))
}

fn strip_path_like_tokens(message: &str) -> String {
    message
        .split_whitespace()
        .map(|token| {
            if is_path_like(token) {
                "<path>"
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_path_like(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| c == '"' || c == '\'' || c == ',' || c == ':');
    let has_separator = trimmed.contains('/') || trimmed.contains('\\');
    let looks_absolute = trimmed.starts_with('/') || trimmed.starts_with("C:\\");
    has_separator && (looks_absolute || trimmed.matches('/').count() >= 2)
}

fn looks_like_stack_frame(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("at ") || trimmed.starts_with("#") && trimmed.contains("0x")
}

fn collapse_whitespace(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}
