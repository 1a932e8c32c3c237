// crates/runbook-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Store
// Description: Public API surface for the SQLite-backed durable store.
// Purpose: Re-export the store type and its configuration/error types.
// Dependencies: runbook-core::store, rusqlite
// ============================================================================

//! Implements [`runbook_core::Store`] on top of a single SQLite database
//! file, covering the four logical tables: `executions`, `audit_log`,
//! `approval_queue`, `metrics`.

pub mod store;

pub use store::SqliteJournalMode;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
