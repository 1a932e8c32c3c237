// crates/runbook-core/src/audit.rs
// ============================================================================
// Module: Audit Log
// Description: Append-only, hash-chained event trail for a single execution (§3, component B).
// Purpose: Give every execution a tamper-evident record independently verifiable after the fact.
// Dependencies: runbook-core::hashing, serde_json
// ============================================================================

//! An [`AuditChain`] belongs to exactly one execution (§3 "Ownership").
//! Every entry's hash covers the previous entry's hash, so altering or
//! reordering any entry invalidates every hash after it; [`AuditChain::verify`]
//! recomputes the chain from scratch and is what crash recovery runs
//! against a chain loaded from the store (§5 "Crash recovery").

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::hashing;
use crate::identifiers::ExecutionId;

/// The kind of event an [`AuditEntry`] records (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A state-machine transition.
    StateTransition,
    /// A human approval was requested.
    ApprovalRequest,
    /// A human approval decision (or timeout outcome) was recorded.
    ApprovalDecision,
    /// A step began executing.
    StepStart,
    /// A step finished (success, failure, or skip).
    StepComplete,
    /// A rollback sequence began.
    RollbackStart,
    /// A rollback sequence finished.
    RollbackComplete,
    /// An engine-internal event not tied to a step or approval.
    System,
}

impl AuditKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::StateTransition => "state_transition",
            Self::ApprovalRequest => "approval_request",
            Self::ApprovalDecision => "approval_decision",
            Self::StepStart => "step_start",
            Self::StepComplete => "step_complete",
            Self::RollbackStart => "rollback_start",
            Self::RollbackComplete => "rollback_complete",
            Self::System => "system",
        }
    }
}

/// A single entry in the hash-chained audit trail (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number, starting at 1.
    pub sequence: u64,
    /// The execution this entry belongs to.
    pub execution_id: ExecutionId,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Event kind.
    pub kind: AuditKind,
    /// Structured payload, shape depends on `kind`.
    pub payload: Value,
    /// Hash of the preceding entry (32 zero bytes, hex, for the first entry).
    pub prev_hash: String,
    /// `SHA-256(prev_hash || sequence || timestamp || kind || canonical(payload))`.
    pub entry_hash: String,
}

/// A broken link found while verifying a chain (§8 "For any audit sequence").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditVerificationError {
    /// Sequence numbers were not strictly monotonic starting at 1.
    #[error("sequence gap at index {index}: expected {expected}, found {found}")]
    SequenceGap {
        /// Index into the chain where the gap was found.
        index: usize,
        /// The sequence number that should have appeared.
        expected: u64,
        /// The sequence number that was actually found.
        found: u64,
    },
    /// An entry's `prev_hash` did not match the preceding entry's `entry_hash`.
    #[error("hash chain broken at sequence {sequence}")]
    ChainBroken {
        /// The sequence number at which the chain broke.
        sequence: u64,
    },
    /// An entry's stored `entry_hash` did not match a recomputation.
    #[error("entry hash mismatch at sequence {sequence}")]
    HashMismatch {
        /// The sequence number with the mismatched hash.
        sequence: u64,
    },
}

/// The append-only hash chain for a single execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditChain {
    entries: Vec<AuditEntry>,
}

impl AuditChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrates a chain from entries already persisted by the store, in
    /// sequence order. Does not verify the chain — call [`Self::verify`]
    /// explicitly (crash recovery always does, per §5).
    #[must_use]
    pub fn from_entries(entries: Vec<AuditEntry>) -> Self {
        Self { entries }
    }

    /// Appends a new entry of `kind` with `payload`, computing its
    /// sequence number and hash from the current tip.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be canonicalized to JSON.
    pub fn append(
        &mut self,
        execution_id: ExecutionId,
        timestamp: impl Into<String>,
        kind: AuditKind,
        payload: Value,
    ) -> Result<&AuditEntry, serde_json::Error> {
        let sequence = self.entries.len() as u64 + 1;
        let prev_hash = self
            .entries
            .last()
            .map_or_else(hashing::genesis_hash, |e| e.entry_hash.clone());
        let timestamp = timestamp.into();
        let entry_hash =
            hashing::entry_hash(&prev_hash, sequence, &timestamp, kind.as_str(), &payload)?;

        self.entries.push(AuditEntry {
            sequence,
            execution_id,
            timestamp,
            kind,
            payload,
            prev_hash,
            entry_hash,
        });
        #[allow(clippy::unwrap_used)]
        Ok(self.entries.last().unwrap())
    }

    /// Returns every entry recorded so far, in sequence order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// The number of entries in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recomputes every hash in the chain and compares it against what is
    /// stored, per §8's audit-sequence invariant. Used at startup to
    /// verify a chain loaded from the store before crash recovery acts
    /// on it (§5).
    ///
    /// # Errors
    ///
    /// Returns the first [`AuditVerificationError`] found.
    pub fn verify(&self) -> Result<(), AuditVerificationError> {
        let mut expected_prev = hashing::genesis_hash();
        for (index, entry) in self.entries.iter().enumerate() {
            let expected_sequence = index as u64 + 1;
            if entry.sequence != expected_sequence {
                return Err(AuditVerificationError::SequenceGap {
                    index,
                    expected: expected_sequence,
                    found: entry.sequence,
                });
            }
            if entry.prev_hash != expected_prev {
                return Err(AuditVerificationError::ChainBroken {
                    sequence: entry.sequence,
                });
            }
            let recomputed = hashing::entry_hash(
                &entry.prev_hash,
                entry.sequence,
                &entry.timestamp,
                entry.kind.as_str(),
                &entry.payload,
            )
            .map_err(|_| AuditVerificationError::HashMismatch {
                sequence: entry.sequence,
            })?;
            if recomputed != entry.entry_hash {
                return Err(AuditVerificationError::HashMismatch {
                    sequence: entry.sequence,
                });
            }
            expected_prev = entry.entry_hash.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_entry_uses_the_genesis_prev_hash() {
        let mut chain = AuditChain::new();
        chain
            .append(ExecutionId::new(), "t0", AuditKind::System, json!({}))
            .expect("append");
        assert_eq!(chain.entries()[0].prev_hash, hashing::genesis_hash());
        assert_eq!(chain.entries()[0].sequence, 1);
    }

    #[test]
    fn sequence_is_strictly_monotonic() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        for i in 0..4 {
            chain
                .append(execution_id.clone(), format!("t{i}"), AuditKind::System, json!({"i": i}))
                .expect("append");
        }
        let sequences: Vec<u64> = chain.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[test]
    fn each_entry_chains_to_the_previous_hash() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        chain
            .append(execution_id.clone(), "t0", AuditKind::StepStart, json!({}))
            .expect("append");
        chain
            .append(execution_id, "t1", AuditKind::StepComplete, json!({}))
            .expect("append");
        assert_eq!(chain.entries()[1].prev_hash, chain.entries()[0].entry_hash);
    }

    #[test]
    fn well_formed_chain_verifies() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        for i in 0..5 {
            chain
                .append(execution_id.clone(), format!("t{i}"), AuditKind::System, json!({"i": i}))
                .expect("append");
        }
        assert!(chain.verify().is_ok());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        chain
            .append(execution_id.clone(), "t0", AuditKind::System, json!({"a": 1}))
            .expect("append");
        chain
            .append(execution_id, "t1", AuditKind::System, json!({"a": 2}))
            .expect("append");

        let mut tampered = chain.clone();
        tampered.entries[0].payload = json!({"a": 999});
        assert!(matches!(
            tampered.verify(),
            Err(AuditVerificationError::HashMismatch { sequence: 1 })
        ));
    }

    #[test]
    fn broken_prev_hash_link_is_detected() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        chain
            .append(execution_id.clone(), "t0", AuditKind::System, json!({}))
            .expect("append");
        chain
            .append(execution_id, "t1", AuditKind::System, json!({}))
            .expect("append");

        let mut tampered = chain.clone();
        tampered.entries[1].prev_hash = "deadbeef".to_owned();
        assert!(matches!(
            tampered.verify(),
            Err(AuditVerificationError::ChainBroken { sequence: 2 })
        ));
    }

    #[test]
    fn sequence_gap_is_detected() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        chain
            .append(execution_id.clone(), "t0", AuditKind::System, json!({}))
            .expect("append");
        chain
            .append(execution_id, "t1", AuditKind::System, json!({}))
            .expect("append");

        let mut tampered = chain.clone();
        tampered.entries[1].sequence = 5;
        assert!(matches!(
            tampered.verify(),
            Err(AuditVerificationError::SequenceGap { index: 1, .. })
        ));
    }

    #[test]
    fn rehydrated_chain_from_entries_can_be_verified() {
        let mut chain = AuditChain::new();
        let execution_id = ExecutionId::new();
        chain
            .append(execution_id, "t0", AuditKind::System, json!({}))
            .expect("append");
        let rehydrated = AuditChain::from_entries(chain.entries().to_vec());
        assert!(rehydrated.verify().is_ok());
    }
}
