// crates/runbook-adapters/src/lib.rs
// ============================================================================
// Module: Reference Adapters
// Description: Public API surface for the reference Adapter implementations.
// Purpose: Give callers a few concrete, registrable adapters out of the box.
// Dependencies: runbook-core::adapter
// ============================================================================

//! Concrete vendor integrations are out of scope for this workspace; what
//! lives here is a small set of reference adapters — a generic HTTP
//! adapter, a mock SIEM, a mock network/EDR control plane, and a wait/noop
//! adapter — enough to register a working [`runbook_core::AdapterRegistry`]
//! and exercise every action class the orchestrator dispatches.

pub mod http;
pub mod mock_network;
pub mod mock_siem;
pub mod wait;

pub use http::HttpAdapter;
pub use http::HttpAdapterConfig;
pub use mock_network::MockNetworkAdapter;
pub use mock_siem::MockSiemAdapter;
pub use wait::WaitAdapter;
