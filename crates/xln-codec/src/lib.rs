//! Canonical serialization and consensus hashing for XLN.
//!
//! Exactly one encoding feeds every hash, signature and byte-equality check
//! in the protocol; `serde`/`bincode` are used only for persistence records
//! and never for consensus bytes.

pub mod encoder;
pub mod roots;

pub use encoder::{CanonicalEncode, Encoder};
pub use roots::{account_root, delta_hash, entity_frame_hash, frame_hash, keccak256};
