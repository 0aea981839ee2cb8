//! Keccak-256 consensus roots.
//!
//! Hash layout:
//! - `delta_hash(delta) = keccak256(canonical(delta))`
//! - `account_root     = keccak256(concat of delta hashes, ascending tokenId)`
//! - `frame_hash       = keccak256(canonical(frame))` — signatures are never
//!   part of the frame record, so the hash covers the frame as exchanged.

use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

use xln_core::frame::{AccountFrame, EntityFrame};
use xln_core::types::{StateHash, TokenId};
use xln_core::Delta;

use crate::encoder::CanonicalEncode;

/// Keccak-256 of arbitrary bytes → 32-byte array.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash of one token's canonical delta encoding.
pub fn delta_hash(delta: &Delta) -> StateHash {
    StateHash::from_bytes(keccak256(&delta.encode_to_vec()))
}

/// The account root: hash over all delta hashes in ascending token order.
/// `BTreeMap` iteration supplies the ascending order.
pub fn account_root(deltas: &BTreeMap<TokenId, Delta>) -> StateHash {
    let mut hasher = Keccak256::new();
    for delta in deltas.values() {
        hasher.update(delta_hash(delta).as_bytes());
    }
    StateHash::from_bytes(hasher.finalize().into())
}

/// Hash a bilateral frame for signing and ack matching.
pub fn frame_hash(frame: &AccountFrame) -> StateHash {
    StateHash::from_bytes(keccak256(&frame.encode_to_vec()))
}

/// Hash an entity frame for precommit signatures.
pub fn entity_frame_hash(frame: &EntityFrame) -> StateHash {
    StateHash::from_bytes(keccak256(&frame.encode_to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn account_root_is_order_independent_of_insertion() {
        let mut a = BTreeMap::new();
        a.insert(2, Delta::new(2));
        a.insert(1, Delta::new(1));

        let mut b = BTreeMap::new();
        b.insert(1, Delta::new(1));
        b.insert(2, Delta::new(2));

        assert_eq!(account_root(&a), account_root(&b));
    }

    #[test]
    fn root_changes_with_any_field() {
        let mut deltas = BTreeMap::new();
        deltas.insert(1, Delta::new(1));
        let before = account_root(&deltas);

        deltas.get_mut(&1).unwrap().offdelta = BigInt::from(1);
        assert_ne!(before, account_root(&deltas));
    }

    #[test]
    fn empty_account_root_is_keccak_of_nothing() {
        let deltas = BTreeMap::new();
        assert_eq!(
            account_root(&deltas),
            StateHash::from_bytes(keccak256(&[]))
        );
    }
}
