// crates/runbook-cli/src/output.rs
// ============================================================================
// Module: Output Helpers
// Description: Small stdout/stderr writers used by every command.
// Purpose: Keep process output off the `println!`/`eprintln!` macros the
//          workspace lints deny, without routing it through a logging crate.
// Dependencies: std::io
// ============================================================================

use std::io::Write;
use std::process::ExitCode;

use crate::CliError;

/// Writes a single line to stdout.
pub fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
pub fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Serializes `value` as pretty JSON and writes it to stdout.
///
/// # Errors
///
/// Returns [`CliError`] if serialization or the write itself fails.
pub fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output as json: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Emits `message` to stderr and returns a failure exit code.
pub fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
