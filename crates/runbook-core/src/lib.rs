// crates/runbook-core/src/lib.rs
// ============================================================================
// Module: Runbook Execution Core Library
// Description: Public API surface for the runbook execution core.
// Purpose: Expose the data model, components, and orchestrator to the rest of the workspace.
// Dependencies: crate::{action, adapter, alert, approval, audit, config, context,
//               controller, errors, execution, executor, hashing, identifiers,
//               loader, orchestrator, policy, runbook, state_machine, templating}
// ============================================================================

//! ## Overview
//!
//! This crate is the execution core described in the system specification:
//! the playbook loader and validator, the deterministic state machine, the
//! layered execution context with templating, the step executor with
//! timeout/retry/rollback, the approval gate, the policy enforcer, the
//! adapter interface and registry, and the orchestrator that composes all
//! of the above for a single alert-to-execution run.
//!
//! Persistence (`runbook-store-sqlite`), ingestion (`runbook-ingest`),
//! concrete vendor adapters (`runbook-adapters`), and the CLI
//! (`runbook-cli`) are separate crates that depend on this one through the
//! narrow contracts defined here.

pub mod action;
pub mod adapter;
pub mod alert;
pub mod approval;
pub mod audit;
pub mod config;
pub mod context;
pub mod controller;
pub mod errors;
pub mod execution;
pub mod executor;
pub mod hashing;
pub mod identifiers;
pub mod loader;
pub mod orchestrator;
pub mod policy;
pub mod recovery;
pub mod runbook;
pub mod state_machine;
pub mod store;
pub mod templating;

pub use action::Action;
pub use action::ActionClass;
pub use adapter::Adapter;
pub use adapter::AdapterCapabilities;
pub use adapter::AdapterError;
pub use adapter::AdapterRegistry;
pub use adapter::AdapterResult;
pub use adapter::HealthReport;
pub use adapter::HealthStatus;
pub use alert::AlertEvent;
pub use approval::ApprovalDecision;
pub use approval::ApprovalGate;
pub use approval::ApprovalOptions;
pub use approval::ApprovalOutcome;
pub use approval::ApprovalPromptError;
pub use approval::ApprovalRequest;
pub use approval::ApprovalResponse;
pub use approval::TimeoutBehavior;
pub use audit::AuditChain;
pub use audit::AuditEntry;
pub use audit::AuditKind;
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use controller::ExecutionController;
pub use errors::Component;
pub use errors::StableError;
pub use execution::ApprovalQueueEntry;
pub use execution::ApprovalQueueStatus;
pub use execution::Execution;
pub use execution::StepResult;
pub use executor::CircuitBreaker;
pub use executor::CircuitBreakerOptions;
pub use executor::RetryOptions;
pub use executor::StepExecutor;
pub use identifiers::ExecutionId;
pub use identifiers::RequestId;
pub use identifiers::RunbookId;
pub use identifiers::StepId;
pub use loader::LoaderCache;
pub use orchestrator::OrchestratorOptions;
pub use orchestrator::RunOutcome;
pub use orchestrator::run;
pub use policy::AutomationPolicy;
pub use policy::PolicyCheckResult;
pub use policy::PolicyRule;
pub use recovery::RecoveryAction;
pub use recovery::RecoveryOutcome;
pub use recovery::recover_crashed_executions;
pub use runbook::AutomationLevel;
pub use runbook::ExecutionMode;
pub use runbook::Runbook;
pub use runbook::Step;
pub use state_machine::ExecutionState;
pub use store::ExecutionFilter;
pub use store::InMemoryStore;
pub use store::MetricPoint;
pub use store::Store;
pub use store::StoreError;
