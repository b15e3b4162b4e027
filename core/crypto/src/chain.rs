//! BLAKE2b hash chain linking audit records.
//!
//! Each record commits to the previous record's signature:
//!
//!   S_i = BLAKE2b-256(ctx || S_{i-1} || id || action || timestamp || entry_id || details)
//!
//! with `S_0` being the all-zero genesis value. Every variable-length field is
//! length prefixed, so shifting bytes between fields changes the link.
//! Modifying, reordering or removing a record breaks every later link.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use subtle::ConstantTimeEq;

/// Domain separation for audit links.
const CHAIN_CONTEXT: &[u8] = b"cryptosafe-audit-chain-v1";

/// Length of a link in bytes.
pub const LINK_LENGTH: usize = 32;

/// Signature the first record is chained to.
pub const GENESIS: [u8; LINK_LENGTH] = [0u8; LINK_LENGTH];

/// The record fields covered by a link, exactly as they are stored.
#[derive(Debug, Clone, Copy)]
pub struct ChainFields<'a> {
    pub id: i64,
    pub action: &'a str,
    pub timestamp: &'a str,
    pub entry_id: Option<i64>,
    /// `None` for a NULL column; distinct from an empty string.
    pub details: Option<&'a str>,
}

/// Compute the link for `fields` following `prev`.
pub fn chain_link(prev: &[u8], fields: &ChainFields<'_>) -> [u8; LINK_LENGTH] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(CHAIN_CONTEXT);
    update_prefixed(&mut hasher, prev);
    hasher.update(fields.id.to_le_bytes());
    update_prefixed(&mut hasher, fields.action.as_bytes());
    update_prefixed(&mut hasher, fields.timestamp.as_bytes());
    match fields.entry_id {
        Some(id) => {
            hasher.update([1u8]);
            hasher.update(id.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
    match fields.details {
        Some(details) => {
            hasher.update([1u8]);
            update_prefixed(&mut hasher, details.as_bytes());
        }
        None => hasher.update([0u8]),
    }

    let mut link = [0u8; LINK_LENGTH];
    link.copy_from_slice(&hasher.finalize());
    link
}

/// Check a stored link against its predecessor in constant time.
pub fn verify_link(prev: &[u8], fields: &ChainFields<'_>, stored: &[u8]) -> bool {
    let computed = chain_link(prev, fields);
    computed[..].ct_eq(stored).into()
}

fn update_prefixed(hasher: &mut Blake2b<U32>, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(id: i64, details: &str) -> ChainFields<'_> {
        ChainFields {
            id,
            action: "EntryCreated",
            timestamp: "2026-01-01T00:00:00.000000Z",
            entry_id: Some(1),
            details: Some(details),
        }
    }

    #[test]
    fn test_chain_append_and_verify() {
        let first = fields(1, "created");
        let second = fields(2, "updated");

        let h1 = chain_link(&GENESIS, &first);
        let h2 = chain_link(&h1, &second);

        assert_ne!(h1, h2);
        assert!(verify_link(&GENESIS, &first, &h1));
        assert!(verify_link(&h1, &second, &h2));
    }

    #[test]
    fn test_detects_field_tampering() {
        let original = fields(1, "created");
        let link = chain_link(&GENESIS, &original);

        assert!(!verify_link(&GENESIS, &fields(1, "tampered"), &link));
        assert!(!verify_link(&GENESIS, &fields(2, "created"), &link));
    }

    #[test]
    fn test_depends_on_previous_link() {
        let record = fields(2, "updated");
        let a = chain_link(&GENESIS, &record);
        let b = chain_link(&[1u8; LINK_LENGTH], &record);
        assert_ne!(a, b);
    }

    #[test]
    fn test_entry_reference_is_covered() {
        let mut with_entry = fields(1, "x");
        let link = chain_link(&GENESIS, &with_entry);
        with_entry.entry_id = None;
        assert!(!verify_link(&GENESIS, &with_entry, &link));
    }

    #[test]
    fn test_null_details_differ_from_empty() {
        let mut record = fields(1, "");
        let link = chain_link(&GENESIS, &record);
        record.details = None;
        assert!(!verify_link(&GENESIS, &record, &link));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = ChainFields {
            action: "Entry",
            timestamp: "Created",
            ..fields(1, "")
        };
        let b = ChainFields {
            action: "EntryCreated",
            timestamp: "",
            ..fields(1, "")
        };
        assert_ne!(chain_link(&GENESIS, &a), chain_link(&GENESIS, &b));
    }
}
