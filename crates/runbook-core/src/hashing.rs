// crates/runbook-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: Canonical JSON serialization and SHA-256 digests for the audit chain.
// Purpose: Give every audit entry a reproducible hash independent of map key order.
// Dependencies: serde_json, sha2
// ============================================================================

//! The audit chain (§3 `AuditEntry`) hashes `prev_hash ∥ sequence ∥
//! timestamp ∥ kind ∥ canonical-JSON payload`. "Canonical" here means: object
//! keys sorted, no insignificant whitespace. `serde_json::Value` already
//! sorts map keys when the `preserve_order` feature is off (the default),
//! so canonicalization reduces to serializing through `Value`.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// A 32-byte SHA-256 digest, rendered as lowercase hex on the wire.
pub type HashHex = String;

/// The all-zero digest used as `prev_hash` for the first entry in a chain.
#[must_use]
pub fn genesis_hash() -> HashHex {
    hex::encode([0u8; 32])
}

/// Serializes `value` to canonical JSON bytes (sorted object keys, compact).
///
/// # Errors
///
/// Returns an error if `value` cannot be represented as JSON.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let as_value = serde_json::to_value(value)?;
    serde_json::to_vec(&as_value)
}

/// Computes the lowercase-hex SHA-256 digest of the given bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> HashHex {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes the audit-entry hash: `SHA-256(prev_hash || seq || timestamp || kind || payload)`.
///
/// # Errors
///
/// Returns an error if `payload` cannot be canonicalized to JSON.
pub fn entry_hash<T: Serialize>(
    prev_hash: &str,
    sequence: u64,
    timestamp: &str,
    kind: &str,
    payload: &T,
) -> Result<HashHex, serde_json::Error> {
    let mut buf = Vec::new();
    buf.extend_from_slice(prev_hash.as_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(timestamp.as_bytes());
    buf.extend_from_slice(kind.as_bytes());
    buf.extend_from_slice(&canonical_json_bytes(payload)?);
    Ok(sha256_hex(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_is_64_zero_hex_chars() {
        let hash = genesis_hash();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c == '0'));
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let bytes = canonical_json_bytes(&a).expect("canonicalize");
        let text = String::from_utf8(bytes).expect("utf8");
        assert_eq!(text, r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn entry_hash_is_deterministic() {
        let payload = serde_json::json!({"step_id": "s1"});
        let h1 = entry_hash("prev", 1, "2026-01-01T00:00:00Z", "step_start", &payload)
            .expect("hash");
        let h2 = entry_hash("prev", 1, "2026-01-01T00:00:00Z", "step_start", &payload)
            .expect("hash");
        assert_eq!(h1, h2);
    }

    #[test]
    fn entry_hash_changes_with_prev_hash() {
        let payload = serde_json::json!({"step_id": "s1"});
        let h1 = entry_hash("a", 1, "t", "k", &payload).expect("hash");
        let h2 = entry_hash("b", 1, "t", "k", &payload).expect("hash");
        assert_ne!(h1, h2);
    }
}
