// crates/runbook-cli/src/main.rs
// ============================================================================
// Module: Runbook Execution Core CLI Entry Point
// Description: Command dispatcher for playbook validation, runs, queue
//              administration, metrics, coverage, and webhook serving.
// Purpose: Give an operator a single binary to drive the execution core
//          without writing a host program.
// Dependencies: clap, runbook-core, runbook-adapters, runbook-ingest,
//               runbook-store-sqlite, serde_json, tokio, tracing.
// ============================================================================

//! This binary is deliberately synchronous except for `serve`: the
//! orchestrator itself never awaits anything, so `main` stays a plain
//! function and only the `serve` command spins up a Tokio runtime, mirroring
//! the rest of the workspace's "async only at the ingestion edge" rule.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod defaults;
mod output;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use runbook_core::AdapterRegistry;
use runbook_core::AlertEvent;
use runbook_core::ApprovalQueueEntry;
use runbook_core::ApprovalQueueStatus;
use runbook_core::ApprovalRequest;
use runbook_core::ApprovalResponse;
use runbook_core::AuditChain;
use runbook_core::AuditKind;
use runbook_core::AutomationLevel;
use runbook_core::AutomationPolicy;
use runbook_core::EngineConfig;
use runbook_core::ExecutionController;
use runbook_core::ExecutionFilter;
use runbook_core::ExecutionMode;
use runbook_core::ExecutionState;
use runbook_core::Runbook;
use runbook_core::Store;
use runbook_core::StoreError;
use runbook_core::errors;
use runbook_core::identifiers::RequestId;
use runbook_core::loader;
use runbook_core::orchestrator;
use runbook_core::orchestrator::ApprovalPrompt;
use runbook_core::orchestrator::OrchestratorOptions;
use runbook_core::orchestrator::RunbookSelector;
use runbook_core::store::MetricPoint;
use runbook_ingest::IngestItem;
use runbook_ingest::parse_batch;
use runbook_ingest::webhook;
use runbook_store_sqlite::SqliteStore;
use runbook_store_sqlite::SqliteStoreConfig;
use serde::Serialize;
use serde_json::Value;

use crate::output::emit_error;
use crate::output::print_json;
use crate::output::write_stderr_line;
use crate::output::write_stdout_line;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "runbookctl", disable_help_subcommand = true)]
struct Cli {
    /// Increase log verbosity; repeatable (`-v`, `-vv`).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Path to the durable store database (overrides `RUNBOOK_DB_PATH`).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validates a runbook file against its structural invariants.
    Validate(ValidateArgs),
    /// Runs a runbook against an alert read from a file or stdin.
    Run(RunArgs),
    /// Administers the L2 approval queue.
    Queue {
        /// Selected queue subcommand.
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Prints recorded metric samples within a time window.
    Metrics(MetricsArgs),
    /// Summarizes execution outcomes by runbook and terminal state.
    Coverage(CoverageArgs),
    /// Serves the alert ingestion webhook.
    Serve(ServeArgs),
}

/// Arguments for the `validate` command.
#[derive(Args, Debug)]
struct ValidateArgs {
    /// Path to the runbook YAML file.
    path: PathBuf,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the runbook YAML file.
    #[arg(long, value_name = "PATH")]
    runbook: PathBuf,
    /// Path to a JSON alert file; reads stdin when omitted.
    #[arg(long, value_name = "PATH")]
    alert: Option<PathBuf>,
    /// Automation level override (`L0`, `L1`, `L2`); defaults to the
    /// runbook's own `config.automation_level`.
    #[arg(long, value_name = "LEVEL")]
    level: Option<String>,
    /// Validate and log the plan without dispatching any adapter call.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
    /// Explicit opt-in required to run at `L2` (§4.3 "separate gate").
    #[arg(long = "enable-l2", action = ArgAction::SetTrue)]
    enable_l2: bool,
    /// Run as an admin identity, enabling policy-rule overrides.
    #[arg(long, action = ArgAction::SetTrue)]
    admin: bool,
    /// Risk score (1-10) attached to this run.
    #[arg(long, value_name = "SCORE")]
    risk_score: Option<u8>,
}

/// Queue subcommands.
#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// Lists queue entries, optionally filtered by status.
    List {
        /// Restrict to one status (`pending`, `approved`, `denied`, `executed`, `expired`).
        #[arg(long)]
        status: Option<String>,
    },
    /// Prints a single queue entry in full.
    Inspect {
        /// The queue entry's request id.
        request_id: String,
    },
    /// Approves a pending entry and dispatches it against its adapter in production.
    Approve {
        /// The queue entry's request id.
        request_id: String,
        /// Identity of the human approving this entry.
        #[arg(long)]
        approver: String,
    },
    /// Denies a pending entry.
    Deny {
        /// The queue entry's request id.
        request_id: String,
        /// Identity of the human denying this entry.
        #[arg(long)]
        approver: String,
        /// Reason for the denial.
        #[arg(long)]
        reason: String,
    },
    /// Marks a past-due pending entry as expired.
    Expire {
        /// The queue entry's request id.
        request_id: String,
    },
}

/// Arguments for the `metrics` command.
#[derive(Args, Debug)]
struct MetricsArgs {
    /// Start of the window, ISO-8601 (inclusive).
    #[arg(long)]
    since: String,
    /// End of the window, ISO-8601 (exclusive).
    #[arg(long)]
    until: String,
}

/// Arguments for the `coverage` command.
#[derive(Args, Debug)]
struct CoverageArgs {
    /// Start of the window, ISO-8601 (inclusive), compared against `started_at`.
    #[arg(long)]
    since: String,
    /// End of the window, ISO-8601 (exclusive), compared against `started_at`.
    #[arg(long)]
    until: String,
}

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind host (overrides `RUNBOOK_WEBHOOK_HOST`).
    #[arg(long)]
    host: Option<String>,
    /// Bind port (overrides `RUNBOOK_WEBHOOK_PORT`).
    #[arg(long)]
    port: Option<u16>,
    /// Directory of runbook files to load as candidates (overrides `RUNBOOK_PLAYBOOK_DIR`).
    #[arg(long, value_name = "DIR")]
    playbook_dir: Option<PathBuf>,
    /// Execution id to leave alone during the crash-recovery sweep,
    /// rather than auto-failing it (§5 "Crash recovery": "unless an
    /// explicit resume command is issued"). Repeatable.
    #[arg(long = "resume", value_name = "EXECUTION_ID")]
    resume: Vec<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper; every command returns one of these on failure.
#[derive(Debug)]
struct CliError {
    /// Human-readable, already-sanitized error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::new(errors::sanitize_message(&err.to_string()))
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = EngineConfig::from_env();
    let db_path = cli.db.clone().unwrap_or_else(|| PathBuf::from(config.database_path.clone()));

    match cli.command {
        Commands::Validate(args) => command_validate(&args),
        Commands::Run(args) => command_run(&args, &db_path),
        Commands::Queue { command } => command_queue(command, &db_path),
        Commands::Metrics(args) => command_metrics(&args, &db_path),
        Commands::Coverage(args) => command_coverage(&args, &db_path),
        Commands::Serve(args) => command_serve(&args, &db_path, &config),
    }
}

fn init_tracing(verbosity: u8) {
    let directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn open_store(db_path: &Path) -> CliResult<SqliteStore> {
    SqliteStore::open(&SqliteStoreConfig::new(db_path))
        .map_err(|err| CliError::new(errors::sanitize_message(&err.to_string())))
}

/// Records the handful of samples the `metrics`/`coverage` surface reads
/// back (§6.4 `metrics` table, §6.6 "emit metrics and coverage for a time
/// window"): step outcome counts, rollback count, and total duration, tagged
/// by execution and runbook id. One call per finished [`orchestrator::run`].
fn record_run_metrics(store: &dyn Store, outcome: &orchestrator::RunOutcome) -> Result<(), StoreError> {
    let recorded_at = outcome
        .execution
        .completed_at
        .clone()
        .unwrap_or_else(|| outcome.execution.started_at.clone());
    let tags = serde_json::json!({
        "execution_id": outcome.execution.execution_id.as_str(),
        "runbook_id": outcome.execution.runbook_id.as_str(),
        "state": format!("{:?}", outcome.execution.state),
    });

    let succeeded = outcome.step_results.iter().filter(|r| r.success).count();
    let failed = outcome.step_results.iter().filter(|r| !r.success).count();

    let samples = [
        ("steps_total", outcome.step_results.len() as f64),
        ("steps_succeeded", succeeded as f64),
        ("steps_failed", failed as f64),
        ("rollbacks_total", outcome.rollback_log.len() as f64),
        ("queued_total", outcome.queue_entries.len() as f64),
        ("duration_ms", outcome.execution.duration_ms.unwrap_or(0) as f64),
    ];
    for (name, value) in samples {
        store.record_metric(&MetricPoint {
            name: name.to_owned(),
            value,
            tags: tags.clone(),
            recorded_at: recorded_at.clone(),
        })?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Validate Command
// ============================================================================

fn command_validate(args: &ValidateArgs) -> CliResult<ExitCode> {
    match loader::load_path_uncached(&args.path) {
        Ok(runbook) => {
            print_json(&ValidationReport {
                valid: true,
                name: runbook.metadata.name.clone(),
                version: runbook.version.clone(),
                automation_level: format!("{:?}", runbook.config.automation_level),
                step_count: runbook.steps.len(),
                errors: Vec::new(),
            })
            .map_err(|err| CliError::new(err.to_string()))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_json(&ValidationReport {
                valid: false,
                name: String::new(),
                version: String::new(),
                automation_level: String::new(),
                step_count: 0,
                errors: vec![errors::sanitize_message(&err.to_string())],
            })
            .map_err(|inner| CliError::new(inner.to_string()))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    name: String,
    version: String,
    automation_level: String,
    step_count: usize,
    errors: Vec<String>,
}

// ============================================================================
// SECTION: Run Command
// ============================================================================

fn command_run(args: &RunArgs, db_path: &Path) -> CliResult<ExitCode> {
    let runbook = loader::load_path_uncached(&args.runbook)
        .map_err(|err| CliError::new(errors::sanitize_message(&err.to_string())))?;
    let invariant_errors = runbook.check_invariants();
    if !invariant_errors.is_empty() {
        return Err(CliError::new(format!(
            "runbook failed {} structural invariant(s)",
            invariant_errors.len()
        )));
    }

    let alert = read_alert(args.alert.as_deref())?;

    let level = match &args.level {
        Some(raw) => parse_level(raw)?,
        None => runbook.config.automation_level,
    };
    let mode = if args.dry_run { ExecutionMode::DryRun } else { ExecutionMode::Production };

    let options = OrchestratorOptions {
        mode,
        level,
        enable_l2: args.enable_l2,
        admin: args.admin,
        risk_score: args.risk_score,
        ..OrchestratorOptions::default()
    };

    let registry = defaults::default_registry()
        .map_err(|err| CliError::new(format!("failed to build adapter registry: {err}")))?;
    let policy = defaults::default_policy();
    let controller = ExecutionController::new();
    let prompt: ApprovalPrompt = Arc::new(stdin_prompt);

    let outcome = orchestrator::run(
        &alert,
        std::slice::from_ref(&runbook),
        RunbookSelector::Explicit(runbook.id.clone()),
        HashMap::new(),
        options,
        &registry,
        &policy,
        &controller,
        Some(prompt),
        None,
    )
    .map_err(|err| CliError::new(err.to_string()))?;

    let store = open_store(db_path)?;
    store.save_execution(&outcome.execution)?;
    store.append_audit_entries(outcome.audit.entries())?;
    for entry in &outcome.queue_entries {
        store.save_queue_entry(entry)?;
    }
    record_run_metrics(&store, &outcome)?;

    let exit =
        if outcome.execution.state == ExecutionState::Completed { ExitCode::SUCCESS } else { ExitCode::FAILURE };

    print_json(&RunReport {
        execution_id: outcome.execution.execution_id.as_str().to_owned(),
        state: format!("{:?}", outcome.execution.state),
        step_results: outcome.step_results.len(),
        queued: outcome.queue_entries.len(),
        rollbacks: outcome.rollback_log.len(),
        error: outcome.execution.error.clone(),
    })
    .map_err(|err| CliError::new(err.to_string()))?;

    Ok(exit)
}

#[derive(Serialize)]
struct RunReport {
    execution_id: String,
    state: String,
    step_results: usize,
    queued: usize,
    rollbacks: usize,
    error: Option<String>,
}

/// A minimal CLI approval transport: asks y/N on stdin. One of several
/// interchangeable prompt implementations the gate accepts (§4.6); the
/// orchestrator never knows which one it was given.
fn stdin_prompt(
    request: &ApprovalRequest,
) -> Result<ApprovalResponse, runbook_core::approval::ApprovalPromptError> {
    write_stdout_line(&format!("approval requested: {}", request.summary))
        .map_err(|err| runbook_core::approval::ApprovalPromptError(err.to_string()))?;
    write_stdout_line(&format!("simulation result: {}", request.simulation_result))
        .map_err(|err| runbook_core::approval::ApprovalPromptError(err.to_string()))?;
    write_stdout_line("approve? [y/N]: ")
        .map_err(|err| runbook_core::approval::ApprovalPromptError(err.to_string()))?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|err| runbook_core::approval::ApprovalPromptError(err.to_string()))?;
    let approved = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    Ok(ApprovalResponse { approved, approver: Some("cli-operator".to_owned()), reason: None })
}

fn read_alert(path: Option<&Path>) -> CliResult<AlertEvent> {
    let input = match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|err| CliError::new(format!("failed to read alert file: {err}")))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|err| CliError::new(format!("failed to read alert from stdin: {err}")))?;
            buf
        }
    };

    let items: Vec<IngestItem> = parse_batch(&input);
    let first = items
        .into_iter()
        .next()
        .ok_or_else(|| CliError::new("no alert found in input".to_owned()))?;
    first.map_err(|err| CliError::new(errors::sanitize_message(&err.to_string())))
}

fn parse_level(raw: &str) -> CliResult<AutomationLevel> {
    match raw.to_ascii_uppercase().as_str() {
        "L0" => Ok(AutomationLevel::L0),
        "L1" => Ok(AutomationLevel::L1),
        "L2" => Ok(AutomationLevel::L2),
        other => Err(CliError::new(format!("unrecognized automation level: {other}"))),
    }
}

// ============================================================================
// SECTION: Queue Command
// ============================================================================

fn command_queue(command: QueueCommand, db_path: &Path) -> CliResult<ExitCode> {
    let store = open_store(db_path)?;
    match command {
        QueueCommand::List { status } => command_queue_list(&store, status.as_deref()),
        QueueCommand::Inspect { request_id } => command_queue_inspect(&store, &request_id),
        QueueCommand::Approve { request_id, approver } => {
            command_queue_approve(&store, &request_id, &approver)
        }
        QueueCommand::Deny { request_id, approver, reason } => {
            command_queue_deny(&store, &request_id, &approver, &reason)
        }
        QueueCommand::Expire { request_id } => command_queue_expire(&store, &request_id),
    }
}

fn parse_queue_status(raw: &str) -> CliResult<ApprovalQueueStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" => Ok(ApprovalQueueStatus::Pending),
        "approved" => Ok(ApprovalQueueStatus::Approved),
        "denied" => Ok(ApprovalQueueStatus::Denied),
        "executed" => Ok(ApprovalQueueStatus::Executed),
        "expired" => Ok(ApprovalQueueStatus::Expired),
        other => Err(CliError::new(format!("unrecognized queue status: {other}"))),
    }
}

fn command_queue_list(store: &SqliteStore, status: Option<&str>) -> CliResult<ExitCode> {
    let status = status.map(parse_queue_status).transpose()?;
    let entries = store.list_queue_entries(status)?;
    print_json(&entries).map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

fn load_queue_entry(store: &SqliteStore, request_id: &str) -> CliResult<ApprovalQueueEntry> {
    let id = RequestId::from_string(request_id.to_owned());
    store
        .load_queue_entry(&id)?
        .ok_or_else(|| CliError::new(format!("no queue entry with request id {request_id}")))
}

fn command_queue_inspect(store: &SqliteStore, request_id: &str) -> CliResult<ExitCode> {
    let entry = load_queue_entry(store, request_id)?;
    print_json(&entry).map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Appends one audit entry to the execution owning a queue decision,
/// persisting only the newly-appended entry (the store rejects re-appending
/// already-persisted sequence numbers, so the rest of the chain must not be
/// passed back in).
fn append_decision_audit_entry(
    store: &SqliteStore,
    entry: &ApprovalQueueEntry,
    payload: Value,
) -> CliResult<()> {
    let existing = store.load_audit_entries(&entry.execution_id)?;
    let mut chain = AuditChain::from_entries(existing);
    chain
        .append(entry.execution_id.clone(), now_iso8601(), AuditKind::ApprovalDecision, payload)
        .map_err(|err| CliError::new(format!("failed to append audit entry: {err}")))?;
    let appended = chain.entries().last().cloned().ok_or_else(|| {
        CliError::new("audit append produced no entry".to_owned())
    })?;
    store.append_audit_entries(std::slice::from_ref(&appended))?;
    Ok(())
}

fn command_queue_approve(store: &SqliteStore, request_id: &str, approver: &str) -> CliResult<ExitCode> {
    let mut entry = load_queue_entry(store, request_id)?;
    if entry.status != ApprovalQueueStatus::Pending {
        return Err(CliError::new(format!(
            "queue entry {request_id} is {:?}, not pending",
            entry.status
        )));
    }

    let registry = defaults::default_registry()
        .map_err(|err| CliError::new(format!("failed to build adapter registry: {err}")))?;
    let adapter = registry
        .get(&entry.executor)
        .ok_or_else(|| CliError::new(format!("no adapter registered as {}", entry.executor)))?;

    let params = Value::Object(entry.parameters.clone());
    let result = adapter.execute(entry.action, &params, ExecutionMode::Production);

    entry.status = ApprovalQueueStatus::Approved;
    entry.approver = Some(approver.to_owned());
    entry.approved_at = Some(now_iso8601());

    if result.success {
        entry.status = ApprovalQueueStatus::Executed;
    }
    store.save_queue_entry(&entry)?;

    append_decision_audit_entry(
        store,
        &entry,
        serde_json::json!({
            "request_id": entry.request_id.as_str(),
            "decision": "approved",
            "approver": approver,
            "dispatch_success": result.success,
        }),
    )?;

    print_json(&entry).map_err(|err| CliError::new(err.to_string()))?;
    if result.success {
        Ok(ExitCode::SUCCESS)
    } else {
        let message = result
            .error
            .as_ref()
            .map(|err| errors::sanitize_message(&err.message))
            .unwrap_or_else(|| "adapter dispatch failed".to_owned());
        write_stderr_line(&message).ok();
        Ok(ExitCode::FAILURE)
    }
}

fn command_queue_deny(
    store: &SqliteStore,
    request_id: &str,
    approver: &str,
    reason: &str,
) -> CliResult<ExitCode> {
    let mut entry = load_queue_entry(store, request_id)?;
    if entry.status != ApprovalQueueStatus::Pending {
        return Err(CliError::new(format!(
            "queue entry {request_id} is {:?}, not pending",
            entry.status
        )));
    }

    entry.status = ApprovalQueueStatus::Denied;
    entry.approver = Some(approver.to_owned());
    entry.approved_at = Some(now_iso8601());
    entry.denial_reason = Some(reason.to_owned());
    store.save_queue_entry(&entry)?;

    append_decision_audit_entry(
        store,
        &entry,
        serde_json::json!({
            "request_id": entry.request_id.as_str(),
            "decision": "denied",
            "approver": approver,
            "reason": reason,
        }),
    )?;

    print_json(&entry).map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

fn command_queue_expire(store: &SqliteStore, request_id: &str) -> CliResult<ExitCode> {
    let mut entry = load_queue_entry(store, request_id)?;
    if entry.status != ApprovalQueueStatus::Pending {
        return Err(CliError::new(format!(
            "queue entry {request_id} is {:?}, not pending",
            entry.status
        )));
    }

    entry.status = ApprovalQueueStatus::Expired;
    store.save_queue_entry(&entry)?;

    append_decision_audit_entry(
        store,
        &entry,
        serde_json::json!({
            "request_id": entry.request_id.as_str(),
            "decision": "expired",
        }),
    )?;

    print_json(&entry).map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Metrics Command
// ============================================================================

fn command_metrics(args: &MetricsArgs, db_path: &Path) -> CliResult<ExitCode> {
    let store = open_store(db_path)?;
    let points: Vec<MetricPoint> = store.metrics_window(&args.since, &args.until)?;
    print_json(&points).map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Coverage Command
// ============================================================================

#[derive(Serialize, Default)]
struct CoverageReport {
    total_executions: usize,
    by_state: BTreeMap<String, usize>,
    by_runbook: BTreeMap<String, usize>,
}

fn command_coverage(args: &CoverageArgs, db_path: &Path) -> CliResult<ExitCode> {
    let store = open_store(db_path)?;
    let executions = store.list_executions(&ExecutionFilter::default())?;

    let mut report = CoverageReport::default();
    for execution in &executions {
        if execution.started_at < args.since || execution.started_at >= args.until {
            continue;
        }
        report.total_executions += 1;
        let state_key = serde_json::to_value(execution.state)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown".to_owned());
        *report.by_state.entry(state_key).or_insert(0) += 1;
        *report.by_runbook.entry(execution.runbook_id.as_str().to_owned()).or_insert(0) += 1;
    }

    print_json(&report).map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Bridges the synchronous orchestrator into the webhook's `AlertHandler`
/// contract, resolving candidates by ATT&CK technique match on every call
/// (§4.9 step 1 `AutoDetect`).
struct CliAlertHandler {
    store: Arc<SqliteStore>,
    registry: AdapterRegistry,
    policy: AutomationPolicy,
    controller: ExecutionController,
    candidates: Vec<Runbook>,
    default_level: AutomationLevel,
}

impl webhook::AlertHandler for CliAlertHandler {
    fn handle(&self, alert: AlertEvent) -> Result<runbook_core::ExecutionId, String> {
        let options = OrchestratorOptions {
            mode: ExecutionMode::Production,
            level: self.default_level,
            ..OrchestratorOptions::default()
        };
        let outcome = orchestrator::run(
            &alert,
            &self.candidates,
            RunbookSelector::AutoDetect { llm_suggestion: None },
            HashMap::new(),
            options,
            &self.registry,
            &self.policy,
            &self.controller,
            None,
            None,
        )
        .map_err(|err| err.to_string())?;

        self.store.save_execution(&outcome.execution).map_err(|err| err.to_string())?;
        self.store.append_audit_entries(outcome.audit.entries()).map_err(|err| err.to_string())?;
        for entry in &outcome.queue_entries {
            self.store.save_queue_entry(entry).map_err(|err| err.to_string())?;
        }
        record_run_metrics(self.store.as_ref(), &outcome).map_err(|err| err.to_string())?;

        Ok(outcome.execution.execution_id)
    }
}

fn command_serve(args: &ServeArgs, db_path: &Path, config: &EngineConfig) -> CliResult<ExitCode> {
    let host = args.host.clone().unwrap_or_else(|| config.webhook_host.clone());
    let port = args.port.unwrap_or(config.webhook_port);
    let playbook_dir =
        args.playbook_dir.clone().unwrap_or_else(|| PathBuf::from(config.playbook_dir.clone()));

    let candidates: Vec<Runbook> = loader::list_directory(&playbook_dir)
        .into_iter()
        .filter_map(|summary| loader::load_path_uncached(&summary.path).ok())
        .collect();

    let store = Arc::new(open_store(db_path)?);

    let resume_ids: std::collections::HashSet<runbook_core::identifiers::ExecutionId> = args
        .resume
        .iter()
        .map(|raw| runbook_core::identifiers::ExecutionId::from_string(raw.clone()))
        .collect();
    let recovered = runbook_core::recover_crashed_executions(store.as_ref(), &resume_ids, || {
        chrono::Utc::now().to_rfc3339()
    })
    .map_err(|err| CliError::new(errors::sanitize_message(&err.to_string())))?;
    for outcome in &recovered {
        match &outcome.action {
            runbook_core::RecoveryAction::FailedCleanChain => tracing::warn!(
                execution_id = %outcome.execution_id,
                previous_state = ?outcome.previous_state,
                "recovered_after_crash: failed execution left non-terminal by a prior process"
            ),
            runbook_core::RecoveryAction::FailedCorruptChain(err) => tracing::error!(
                execution_id = %outcome.execution_id,
                previous_state = ?outcome.previous_state,
                error = %err,
                "recovered_after_crash: audit chain failed verification"
            ),
            runbook_core::RecoveryAction::LeftForResume => tracing::info!(
                execution_id = %outcome.execution_id,
                previous_state = ?outcome.previous_state,
                "left non-terminal execution untouched for resume"
            ),
        }
    }

    let registry = defaults::default_registry()
        .map_err(|err| CliError::new(format!("failed to build adapter registry: {err}")))?;
    let policy = defaults::default_policy();
    let controller = ExecutionController::new();

    let handler: Arc<dyn webhook::AlertHandler> = Arc::new(CliAlertHandler {
        store,
        registry,
        policy,
        controller,
        candidates,
        default_level: config.default_automation_level,
    });
    let state = webhook::WebhookState::new(handler, config.hmac_secret.clone());
    let app = webhook::router(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(format!("failed to start async runtime: {err}")))?;

    runtime.block_on(async move {
        let address = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|err| CliError::new(format!("failed to bind {address}: {err}")))?;
        write_stdout_line(&format!("listening on {address}"))
            .map_err(|err| CliError::new(err.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|err| CliError::new(format!("webhook server error: {err}")))
    })?;

    Ok(ExitCode::SUCCESS)
}
