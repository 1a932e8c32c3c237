// crates/runbook-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: SQLite-backed implementation of runbook_core::Store (§6.4).
// Purpose: Give the CLI and ingestion front door a durable, crash-safe store.
// Dependencies: rusqlite, runbook-core::{audit, execution, identifiers, store}
// ============================================================================

//! Four tables, one file: `executions`, `audit_log`, `approval_queue`,
//! `metrics`. Each row keeps its full record as a JSON blob plus the
//! columns needed for the indexes named in §6.4; reads deserialize the
//! blob, writes serialize it inside the same transaction that updates the
//! indexed columns, so the two can never drift apart.
//!
//! `audit_log` carries `BEFORE UPDATE` and `BEFORE DELETE` triggers that
//! abort the statement: the table is append-only below the SQL layer, not
//! just by convention in this crate.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;

use runbook_core::audit::AuditEntry;
use runbook_core::execution::ApprovalQueueEntry;
use runbook_core::execution::ApprovalQueueStatus;
use runbook_core::execution::Execution;
use runbook_core::identifiers::ExecutionId;
use runbook_core::identifiers::RequestId;
use runbook_core::identifiers::RunbookId;
use runbook_core::state_machine::ExecutionState;
use runbook_core::store::ExecutionFilter;
use runbook_core::store::MetricPoint;
use runbook_core::store::Store;
use runbook_core::store::StoreError;

const SCHEMA_VERSION: i64 = 1;

/// `PRAGMA journal_mode` setting (§6.4 "durability").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqliteJournalMode {
    /// Write-ahead log. Default; survives a crash without losing committed writes.
    #[default]
    Wal,
    /// The classic rollback journal.
    Delete,
}

impl SqliteJournalMode {
    const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// `PRAGMA synchronous` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqliteSyncMode {
    /// Flush on every commit. Slower, safest against power loss.
    #[default]
    Full,
    /// Flush at checkpoint boundaries only. Safe under WAL against application crashes.
    Normal,
}

impl SqliteSyncMode {
    const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }
}

/// Configuration for [`SqliteStore::open`].
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the database file. Created if it does not exist.
    pub path: PathBuf,
    /// How long a writer waits on a lock before giving up.
    pub busy_timeout_ms: u64,
    /// Journal mode pragma.
    pub journal_mode: SqliteJournalMode,
    /// Synchronous pragma.
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Builds a config pointing at `path` with the durable defaults (§6.4: WAL, full sync).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 5_000,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Errors specific to opening or initializing the SQLite backend, converted
/// to [`StoreError`] at the [`Store`] trait boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SqliteStoreError {
    /// The database file or its parent directory could not be created or opened.
    #[error("sqlite io error: {0}")]
    Io(String),
    /// The database returned an error executing a statement.
    #[error("sqlite error: {0}")]
    Db(String),
    /// A stored row failed to (de)serialize.
    #[error("sqlite stored data invalid: {0}")]
    Invalid(String),
    /// The database's schema version is newer than this build understands.
    #[error("unsupported schema version: {0}")]
    VersionMismatch(i64),
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::Io(msg) => Self::Io(msg),
            SqliteStoreError::Db(msg) => Self::Io(msg),
            SqliteStoreError::Invalid(msg) => Self::Invalid(msg),
            SqliteStoreError::VersionMismatch(v) => {
                Self::Corrupt(format!("unsupported schema version: {v}"))
            }
        }
    }
}

fn db_err(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

/// SQLite-backed [`Store`] implementation.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `config.path` and ensures
    /// its schema is initialized.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the file or its parent directory
    /// cannot be created, the connection cannot be opened, or the schema is
    /// at an unsupported version.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Mutex::new(connection) })
    }

    /// Opens an in-memory database. Used by tests and as a scratch store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the connection cannot be opened or
    /// the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let mut connection = Connection::open_in_memory().map_err(db_err)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Mutex::new(connection) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_err)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_err)?;
    Ok(())
}

fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_err)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_err)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_err)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_err)?;
            create_tables(&tx)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => return Err(SqliteStoreError::VersionMismatch(value)),
    }
    tx.commit().map_err(db_err)?;
    Ok(())
}

fn create_tables(tx: &rusqlite::Transaction<'_>) -> Result<(), SqliteStoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS executions (
            execution_id TEXT PRIMARY KEY,
            runbook_id TEXT NOT NULL,
            state TEXT NOT NULL,
            started_at TEXT NOT NULL,
            execution_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_executions_runbook_started
            ON executions (runbook_id, started_at);
        CREATE INDEX IF NOT EXISTS idx_executions_state
            ON executions (state);

        CREATE TABLE IF NOT EXISTS audit_log (
            execution_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            entry_json BLOB NOT NULL,
            PRIMARY KEY (execution_id, sequence)
        );
        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
            BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END;
        CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
            BEFORE DELETE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END;

        CREATE TABLE IF NOT EXISTS approval_queue (
            request_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            entry_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_approval_queue_status_expires
            ON approval_queue (status, expires_at);

        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            recorded_at TEXT NOT NULL,
            tags_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_metrics_recorded_at
            ON metrics (recorded_at);",
    )
    .map_err(db_err)
}

fn to_json(value: &impl serde::Serialize) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|err| StoreError::Invalid(err.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::Invalid(err.to_string()))
}

fn state_as_str(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Idle => "idle",
        ExecutionState::Planning => "planning",
        ExecutionState::AwaitingApproval => "awaiting_approval",
        ExecutionState::Executing => "executing",
        ExecutionState::Completed => "completed",
        ExecutionState::Failed => "failed",
        ExecutionState::Cancelled => "cancelled",
        ExecutionState::TimedOut => "timed_out",
        ExecutionState::RolledBack => "rolled_back",
    }
}

fn status_as_str(status: ApprovalQueueStatus) -> &'static str {
    match status {
        ApprovalQueueStatus::Pending => "pending",
        ApprovalQueueStatus::Approved => "approved",
        ApprovalQueueStatus::Denied => "denied",
        ApprovalQueueStatus::Executed => "executed",
        ApprovalQueueStatus::Expired => "expired",
    }
}

impl Store for SqliteStore {
    fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let blob = to_json(execution)?;
        let connection = self.lock();
        connection
            .execute(
                "INSERT INTO executions (execution_id, runbook_id, state, started_at, execution_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (execution_id) DO UPDATE SET
                    runbook_id = excluded.runbook_id,
                    state = excluded.state,
                    started_at = excluded.started_at,
                    execution_json = excluded.execution_json",
                params![
                    execution.execution_id.as_str(),
                    execution.runbook_id.as_str(),
                    state_as_str(execution.state),
                    execution.started_at,
                    blob,
                ],
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    fn load_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        let connection = self.lock();
        let blob: Option<Vec<u8>> = connection
            .query_row(
                "SELECT execution_json FROM executions WHERE execution_id = ?1",
                params![execution_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        blob.map(|bytes| from_json(&bytes)).transpose()
    }

    fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let connection = self.lock();
        let mut sql = String::from("SELECT execution_json FROM executions WHERE 1 = 1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(runbook_id) = &filter.runbook_id {
            sql.push_str(" AND runbook_id = ?");
            bound.push(Box::new(runbook_id.as_str().to_owned()));
        }
        if let Some(state) = filter.state {
            sql.push_str(" AND state = ?");
            bound.push(Box::new(state_as_str(state)));
        }
        sql.push_str(" ORDER BY started_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(AsRef::as_ref).collect();
        let mut stmt = connection.prepare(&sql).map_err(|err| StoreError::Io(err.to_string()))?;
        let rows = stmt
            .query_map(params.as_slice(), |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let blob = row.map_err(|err| StoreError::Io(err.to_string()))?;
            out.push(from_json(&blob)?);
        }
        Ok(out)
    }

    fn non_terminal_executions(&self) -> Result<Vec<Execution>, StoreError> {
        let connection = self.lock();
        let terminal = [
            state_as_str(ExecutionState::Completed),
            state_as_str(ExecutionState::Failed),
            state_as_str(ExecutionState::Cancelled),
            state_as_str(ExecutionState::TimedOut),
            state_as_str(ExecutionState::RolledBack),
        ];
        let placeholders = terminal.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT execution_json FROM executions WHERE state NOT IN ({placeholders})"
        );
        let mut stmt = connection.prepare(&sql).map_err(|err| StoreError::Io(err.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(terminal.iter()), |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let blob = row.map_err(|err| StoreError::Io(err.to_string()))?;
            out.push(from_json(&blob)?);
        }
        Ok(out)
    }

    fn append_audit_entries(&self, entries: &[AuditEntry]) -> Result<(), StoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction().map_err(|err| StoreError::Io(err.to_string()))?;
        for entry in entries {
            let blob = to_json(entry)?;
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO audit_log (execution_id, sequence, entry_json)
                     VALUES (?1, ?2, ?3)",
                    params![entry.execution_id.as_str(), entry.sequence, blob],
                )
                .map_err(|err| StoreError::Io(err.to_string()))?;
            if inserted == 0 {
                return Err(StoreError::Invalid(format!(
                    "audit entry sequence {} already recorded for execution {}",
                    entry.sequence, entry.execution_id
                )));
            }
        }
        tx.commit().map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    fn load_audit_entries(&self, execution_id: &ExecutionId) -> Result<Vec<AuditEntry>, StoreError> {
        let connection = self.lock();
        let mut stmt = connection
            .prepare(
                "SELECT entry_json FROM audit_log WHERE execution_id = ?1 ORDER BY sequence ASC",
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let rows = stmt
            .query_map(params![execution_id.as_str()], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let blob = row.map_err(|err| StoreError::Io(err.to_string()))?;
            out.push(from_json(&blob)?);
        }
        Ok(out)
    }

    fn save_queue_entry(&self, entry: &ApprovalQueueEntry) -> Result<(), StoreError> {
        let blob = to_json(entry)?;
        let connection = self.lock();
        connection
            .execute(
                "INSERT INTO approval_queue (request_id, status, requested_at, expires_at, entry_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (request_id) DO UPDATE SET
                    status = excluded.status,
                    requested_at = excluded.requested_at,
                    expires_at = excluded.expires_at,
                    entry_json = excluded.entry_json",
                params![
                    entry.request_id.as_str(),
                    status_as_str(entry.status),
                    entry.requested_at,
                    entry.expires_at,
                    blob,
                ],
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    fn load_queue_entry(&self, request_id: &RequestId) -> Result<Option<ApprovalQueueEntry>, StoreError> {
        let connection = self.lock();
        let blob: Option<Vec<u8>> = connection
            .query_row(
                "SELECT entry_json FROM approval_queue WHERE request_id = ?1",
                params![request_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        blob.map(|bytes| from_json(&bytes)).transpose()
    }

    fn list_queue_entries(
        &self,
        status: Option<ApprovalQueueStatus>,
    ) -> Result<Vec<ApprovalQueueEntry>, StoreError> {
        let connection = self.lock();
        let (sql, bound) = match status {
            Some(status) => (
                "SELECT entry_json FROM approval_queue WHERE status = ?1 ORDER BY requested_at ASC",
                status_as_str(status),
            ),
            None => (
                "SELECT entry_json FROM approval_queue ORDER BY requested_at ASC",
                "",
            ),
        };
        let mut stmt = connection.prepare(sql).map_err(|err| StoreError::Io(err.to_string()))?;
        let rows = if status.is_some() {
            stmt.query_map(params![bound], |row| row.get::<_, Vec<u8>>(0))
        } else {
            stmt.query_map(params![], |row| row.get::<_, Vec<u8>>(0))
        }
        .map_err(|err| StoreError::Io(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let blob = row.map_err(|err| StoreError::Io(err.to_string()))?;
            out.push(from_json(&blob)?);
        }
        Ok(out)
    }

    fn record_metric(&self, point: &MetricPoint) -> Result<(), StoreError> {
        let tags = to_json(&point.tags)?;
        let connection = self.lock();
        connection
            .execute(
                "INSERT INTO metrics (name, value, recorded_at, tags_json) VALUES (?1, ?2, ?3, ?4)",
                params![point.name, point.value, point.recorded_at, tags],
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    fn metrics_window(&self, since: &str, until: &str) -> Result<Vec<MetricPoint>, StoreError> {
        let connection = self.lock();
        let mut stmt = connection
            .prepare(
                "SELECT name, value, recorded_at, tags_json FROM metrics
                 WHERE recorded_at >= ?1 AND recorded_at < ?2
                 ORDER BY recorded_at ASC",
            )
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let rows = stmt
            .query_map(params![since, until], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let (name, value, recorded_at, tags_blob) =
                row.map_err(|err| StoreError::Io(err.to_string()))?;
            let tags = from_json(&tags_blob)?;
            out.push(MetricPoint { name, value, tags, recorded_at });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_core::context::ExecutionContext;
    use runbook_core::runbook::ExecutionMode;
    use std::collections::HashMap;

    fn sample_execution() -> Execution {
        let ctx = ExecutionContext::new(serde_json::json!({}), HashMap::new());
        Execution::new(
            RunbookId::new("3fa85f64-5717-4562-b3fc-2c963f66afa6"),
            "1.0.0",
            "Isolate and Notify",
            ExecutionMode::Production,
            ctx,
            "2026-01-01T00:00:00Z",
        )
    }

    #[test]
    fn round_trips_an_execution() {
        let store = SqliteStore::open_in_memory().expect("open");
        let execution = sample_execution();
        store.save_execution(&execution).expect("save");
        let loaded = store.load_execution(&execution.execution_id).expect("load");
        assert_eq!(loaded, Some(execution));
    }

    #[test]
    fn non_terminal_executions_excludes_completed_rows() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut execution = sample_execution();
        store.save_execution(&execution).expect("save");
        assert_eq!(store.non_terminal_executions().expect("list").len(), 1);

        execution.state = ExecutionState::Completed;
        store.save_execution(&execution).expect("save");
        assert_eq!(store.non_terminal_executions().expect("list").len(), 0);
    }

    #[test]
    fn duplicate_audit_sequence_is_rejected() {
        let store = SqliteStore::open_in_memory().expect("open");
        let execution_id = ExecutionId::new();
        let entry = AuditEntry {
            sequence: 1,
            execution_id: execution_id.clone(),
            timestamp: "t0".to_owned(),
            kind: runbook_core::audit::AuditKind::System,
            payload: serde_json::json!({}),
            prev_hash: runbook_core::hashing::genesis_hash(),
            entry_hash: "deadbeef".to_owned(),
        };
        store.append_audit_entries(std::slice::from_ref(&entry)).expect("append");
        assert!(store.append_audit_entries(std::slice::from_ref(&entry)).is_err());
    }

    #[test]
    fn audit_log_rejects_update_and_delete_at_the_storage_layer() {
        let store = SqliteStore::open_in_memory().expect("open");
        let execution_id = ExecutionId::new();
        let entry = AuditEntry {
            sequence: 1,
            execution_id: execution_id.clone(),
            timestamp: "t0".to_owned(),
            kind: runbook_core::audit::AuditKind::System,
            payload: serde_json::json!({}),
            prev_hash: runbook_core::hashing::genesis_hash(),
            entry_hash: "deadbeef".to_owned(),
        };
        store.append_audit_entries(std::slice::from_ref(&entry)).expect("append");

        let connection = store.lock();
        let update_result = connection.execute(
            "UPDATE audit_log SET entry_json = ?1 WHERE execution_id = ?2",
            params![b"{}".to_vec(), execution_id.as_str()],
        );
        assert!(update_result.is_err());
        let delete_result = connection.execute(
            "DELETE FROM audit_log WHERE execution_id = ?1",
            params![execution_id.as_str()],
        );
        assert!(delete_result.is_err());
    }

    #[test]
    fn queue_entries_filter_by_status() {
        let store = SqliteStore::open_in_memory().expect("open");
        let entry = ApprovalQueueEntry {
            request_id: RequestId::new(),
            execution_id: ExecutionId::new(),
            runbook_id: RunbookId::new("r1"),
            runbook_name: "name".to_owned(),
            step_id: runbook_core::identifiers::StepId::from("step-01"),
            step_name: "step".to_owned(),
            executor: "mock-network".to_owned(),
            action: runbook_core::action::Action::BlockIp,
            parameters: serde_json::Map::new(),
            simulation_result: serde_json::Value::Null,
            status: ApprovalQueueStatus::Pending,
            requested_at: "t0".to_owned(),
            expires_at: "t1".to_owned(),
            approver: None,
            approved_at: None,
            denial_reason: None,
        };
        store.save_queue_entry(&entry).expect("save");
        assert_eq!(store.list_queue_entries(Some(ApprovalQueueStatus::Pending)).expect("list").len(), 1);
        assert_eq!(store.list_queue_entries(Some(ApprovalQueueStatus::Approved)).expect("list").len(), 0);
    }

    #[test]
    fn metrics_window_filters_by_recorded_at() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .record_metric(&MetricPoint {
                name: "steps_total".to_owned(),
                value: 1.0,
                tags: serde_json::json!({}),
                recorded_at: "2026-01-01T00:00:00Z".to_owned(),
            })
            .expect("record");
        store
            .record_metric(&MetricPoint {
                name: "steps_total".to_owned(),
                value: 2.0,
                tags: serde_json::json!({}),
                recorded_at: "2026-02-01T00:00:00Z".to_owned(),
            })
            .expect("record");
        let window = store
            .metrics_window("2026-01-01T00:00:00Z", "2026-01-15T00:00:00Z")
            .expect("window");
        assert_eq!(window.len(), 1);
        assert!((window[0].value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reopening_an_existing_database_preserves_its_schema_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runbook.db");
        let config = SqliteStoreConfig::new(&path);
        {
            let store = SqliteStore::open(&config).expect("open");
            store.save_execution(&sample_execution()).expect("save");
        }
        let reopened = SqliteStore::open(&config).expect("reopen");
        assert_eq!(reopened.list_executions(&ExecutionFilter::default()).expect("list").len(), 1);
    }
}
