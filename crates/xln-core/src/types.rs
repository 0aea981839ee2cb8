use serde::{Deserialize, Serialize};
use std::fmt;

use num_bigint::BigInt;

/// Arbitrary-precision signed amount in the smallest indivisible unit of a
/// token. Every balance-like quantity in consensus paths uses this type;
/// conversion to native integers is forbidden there.
pub type Amount = BigInt;

/// Token index, unique within a jurisdiction.
pub type TokenId = u64;

/// Monotonic per-account bilateral frame counter (starts at 0).
pub type FrameId = u64;

/// Milliseconds since Unix epoch, supplied by the runtime clock.
pub type Timestamp = u64;

/// Transaction sequence number per submitting party (monotonically increasing).
pub type Nonce = u64;

// ── EntityId ─────────────────────────────────────────────────────────────────

/// 32-byte entity identifier. Ordering is lexicographic on the byte sequence;
/// the lower of the two parties of an account is the **left** party.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub [u8; 32]);

impl EntityId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True when `self` is the left party of an account with `other`.
    pub fn is_left_of(&self, other: &EntityId) -> bool {
        self.0 < other.0
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", &self.to_b58()[..8])
    }
}

// ── SignerId ─────────────────────────────────────────────────────────────────

/// Opaque short identifier of a validator replica within an entity quorum.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignerId(pub String);

impl SignerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerId({})", self.0)
    }
}

// ── StateHash ────────────────────────────────────────────────────────────────

/// 32-byte Keccak-256 digest of a canonically encoded state or frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateHash(pub [u8; 32]);

impl StateHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateHash({}…)", &self.to_hex()[..16])
    }
}

// ── AccountSide ──────────────────────────────────────────────────────────────

/// Which party of a bilateral account submitted or signed something.
/// Left sorts before Right in the canonical tx order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum AccountSide {
    Left,
    Right,
}

impl AccountSide {
    pub fn other(self) -> Self {
        match self {
            AccountSide::Left => AccountSide::Right,
            AccountSide::Right => AccountSide::Left,
        }
    }

    pub fn is_left(self) -> bool {
        matches!(self, AccountSide::Left)
    }

    pub fn from_is_left(is_left: bool) -> Self {
        if is_left {
            AccountSide::Left
        } else {
            AccountSide::Right
        }
    }
}

impl fmt::Display for AccountSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountSide::Left => write!(f, "left"),
            AccountSide::Right => write!(f, "right"),
        }
    }
}

// ── Ed25519 key material ─────────────────────────────────────────────────────

/// Ed25519 public key (32 bytes).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub Vec<u8>);

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519PublicKey({})", hex::encode(&self.0))
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519Signature(pub Vec<u8>);

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(&self.0);
        write!(f, "Ed25519Signature({}…)", &h[..h.len().min(16)])
    }
}

// ── OfferId ──────────────────────────────────────────────────────────────────

/// Identifier of a hash-lock or swap offer within one account.
/// Assigned by the submitting side; unique per account and namespace.
pub type OfferId = u64;
