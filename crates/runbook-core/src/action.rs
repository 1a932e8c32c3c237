// crates/runbook-core/src/action.rs
// ============================================================================
// Module: Action Catalog
// Description: The closed set of actions a step may invoke, and their read/write class.
// Purpose: Let the policy enforcer and L2 guard reason about blast radius (§4.8, §6.2).
// Dependencies: serde
// ============================================================================

//! Actions are a closed enum, not a free-form string: an adapter cannot
//! introduce a new action by simply naming one in a runbook. Each action
//! has a fixed [`ActionClass`] so the policy layer can apply the
//! L2-production-write guard (§4.8) without consulting the adapter. The
//! enum itself has no catch-all variant — text that doesn't name one of
//! these actions fails to parse, and callers that accept action names
//! from untyped input (the loader, the webhook body) fall back to
//! [`classify_action_name`] for the fail-safe "unknown defaults to
//! write" rule.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Whether an action only observes state or mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    /// The action only reads, queries, enriches, notifies, waits, or hashes; no side effects.
    Read,
    /// The action mutates external state (isolate, block, disable, quarantine, ...).
    Write,
}

/// The closed catalog of actions a runbook step may request (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    IsolateHost,
    RestoreConnectivity,
    BlockIp,
    UnblockIp,
    BlockDomain,
    UnblockDomain,
    CollectLogs,
    QuerySiem,
    CollectNetworkTraffic,
    SnapshotMemory,
    CollectFileMetadata,
    EnrichIoc,
    CheckReputation,
    QueryThreatFeed,
    CreateTicket,
    UpdateTicket,
    NotifyAnalyst,
    NotifyOncall,
    SendEmail,
    DisableAccount,
    EnableAccount,
    ResetPassword,
    RevokeSession,
    QuarantineFile,
    RestoreFile,
    DeleteFile,
    CalculateHash,
    KillProcess,
    StartEdrScan,
    RetrieveEdrData,
    ExecuteScript,
    HttpRequest,
    Wait,
}

impl Action {
    /// All actions in the closed catalog, in wire-vocabulary order (§6.2).
    pub const ALL: &'static [Action] = &[
        Action::IsolateHost,
        Action::RestoreConnectivity,
        Action::BlockIp,
        Action::UnblockIp,
        Action::BlockDomain,
        Action::UnblockDomain,
        Action::CollectLogs,
        Action::QuerySiem,
        Action::CollectNetworkTraffic,
        Action::SnapshotMemory,
        Action::CollectFileMetadata,
        Action::EnrichIoc,
        Action::CheckReputation,
        Action::QueryThreatFeed,
        Action::CreateTicket,
        Action::UpdateTicket,
        Action::NotifyAnalyst,
        Action::NotifyOncall,
        Action::SendEmail,
        Action::DisableAccount,
        Action::EnableAccount,
        Action::ResetPassword,
        Action::RevokeSession,
        Action::QuarantineFile,
        Action::RestoreFile,
        Action::DeleteFile,
        Action::CalculateHash,
        Action::KillProcess,
        Action::StartEdrScan,
        Action::RetrieveEdrData,
        Action::ExecuteScript,
        Action::HttpRequest,
        Action::Wait,
    ];

    /// Returns the wire-form snake_case name of this action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsolateHost => "isolate_host",
            Self::RestoreConnectivity => "restore_connectivity",
            Self::BlockIp => "block_ip",
            Self::UnblockIp => "unblock_ip",
            Self::BlockDomain => "block_domain",
            Self::UnblockDomain => "unblock_domain",
            Self::CollectLogs => "collect_logs",
            Self::QuerySiem => "query_siem",
            Self::CollectNetworkTraffic => "collect_network_traffic",
            Self::SnapshotMemory => "snapshot_memory",
            Self::CollectFileMetadata => "collect_file_metadata",
            Self::EnrichIoc => "enrich_ioc",
            Self::CheckReputation => "check_reputation",
            Self::QueryThreatFeed => "query_threat_feed",
            Self::CreateTicket => "create_ticket",
            Self::UpdateTicket => "update_ticket",
            Self::NotifyAnalyst => "notify_analyst",
            Self::NotifyOncall => "notify_oncall",
            Self::SendEmail => "send_email",
            Self::DisableAccount => "disable_account",
            Self::EnableAccount => "enable_account",
            Self::ResetPassword => "reset_password",
            Self::RevokeSession => "revoke_session",
            Self::QuarantineFile => "quarantine_file",
            Self::RestoreFile => "restore_file",
            Self::DeleteFile => "delete_file",
            Self::CalculateHash => "calculate_hash",
            Self::KillProcess => "kill_process",
            Self::StartEdrScan => "start_edr_scan",
            Self::RetrieveEdrData => "retrieve_edr_data",
            Self::ExecuteScript => "execute_script",
            Self::HttpRequest => "http_request",
            Self::Wait => "wait",
        }
    }

    /// Classifies this action as a read or a write (§4.8).
    ///
    /// Exhaustive over the closed catalog: every variant is matched
    /// explicitly, so adding a new action to the enum without giving it
    /// a class is a compile error rather than a silent fail-open.
    #[must_use]
    pub const fn class(self) -> ActionClass {
        match self {
            // isolate/restore, block/unblock IP or domain
            Self::IsolateHost
            | Self::RestoreConnectivity
            | Self::BlockIp
            | Self::UnblockIp
            | Self::BlockDomain
            | Self::UnblockDomain
            // account disable/enable/reset/revoke
            | Self::DisableAccount
            | Self::EnableAccount
            | Self::ResetPassword
            | Self::RevokeSession
            // quarantine/restore/delete file
            | Self::QuarantineFile
            | Self::RestoreFile
            | Self::DeleteFile
            // kill_process, execute_script
            | Self::KillProcess
            | Self::ExecuteScript => ActionClass::Write,

            // queries, enrichments, notifications, tickets, waits, hashes,
            // plain HTTP, starting a scan
            Self::CollectLogs
            | Self::QuerySiem
            | Self::CollectNetworkTraffic
            | Self::SnapshotMemory
            | Self::CollectFileMetadata
            | Self::EnrichIoc
            | Self::CheckReputation
            | Self::QueryThreatFeed
            | Self::CreateTicket
            | Self::UpdateTicket
            | Self::NotifyAnalyst
            | Self::NotifyOncall
            | Self::SendEmail
            | Self::CalculateHash
            | Self::StartEdrScan
            | Self::RetrieveEdrData
            | Self::HttpRequest
            | Self::Wait => ActionClass::Read,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known [`Action`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownActionError(pub String);

impl FromStr for Action {
    type Err = UnknownActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownActionError(s.to_owned()))
    }
}

/// Classifies an action name that may not parse as a known [`Action`].
///
/// Per §4.8, an action name that fails to parse is treated as a write for
/// policy purposes: the fail-safe default is the more restrictive class,
/// never the more permissive one.
#[must_use]
pub fn classify_action_name(name: &str) -> ActionClass {
    name.parse::<Action>()
        .map_or(ActionClass::Write, Action::class)
}
