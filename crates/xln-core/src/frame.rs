//! Bilateral and entity frame records.
//!
//! An [`AccountFrame`] is the atomic unit of the bilateral protocol: a batch
//! of ordered account txs bracketed by the state roots before and after. It
//! is signed independently by both parties over its canonical hash; holding
//! both signatures makes it committed, and the latest committed frame plus
//! its signatures is the dispute proof.

use serde::{Deserialize, Serialize};

use crate::tx::{AccountTx, EntityTx};
use crate::types::{Ed25519Signature, FrameId, SignerId, StateHash, Timestamp};

// ── AccountFrame ─────────────────────────────────────────────────────────────

/// Canonical record exchanged between the two sides of an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFrame {
    pub frame_id: FrameId,
    /// Supplied by the proposing side; monotonic per account.
    pub timestamp: Timestamp,
    /// Account root after the previous frame.
    pub prev_state_hash: StateHash,
    /// Canonically ordered txs (bit-exact on both sides).
    pub txs: Vec<AccountTx>,
    /// Account root after applying `txs`.
    pub post_state_hash: StateHash,
    pub proposer_is_left: bool,
}

/// A frame that holds both parties' signatures over its canonical hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedAccountFrame {
    pub frame: AccountFrame,
    pub left_sig: Ed25519Signature,
    pub right_sig: Ed25519Signature,
}

// ── Bilateral wire messages ──────────────────────────────────────────────────

/// The message contract the bilateral protocol requires from transport.
/// Delivery may be reordered; stale frames are rejected by `prev_state_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMessage {
    /// Proposer → receiver: a new frame with the proposer's signature.
    FramePropose {
        frame: AccountFrame,
        sig: Ed25519Signature,
    },
    /// Receiver → proposer: the receiver validated, signed and committed.
    FrameAck {
        frame_id: FrameId,
        post_state_hash: StateHash,
        sig: Ed25519Signature,
    },
    /// Receiver → proposer: typed rejection; the proposer must roll back.
    FrameNack { frame_id: FrameId, reason: String },
}

impl AccountMessage {
    pub fn frame_id(&self) -> FrameId {
        match self {
            AccountMessage::FramePropose { frame, .. } => frame.frame_id,
            AccountMessage::FrameAck { frame_id, .. } => *frame_id,
            AccountMessage::FrameNack { frame_id, .. } => *frame_id,
        }
    }
}

// ── EntityFrame ──────────────────────────────────────────────────────────────

/// An entity-consensus frame: an ordered batch of entity txs agreed by a
/// weighted quorum of the entity's validators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFrame {
    pub height: u64,
    pub timestamp: Timestamp,
    pub prev_state_hash: StateHash,
    pub txs: Vec<EntityTx>,
    pub post_state_hash: StateHash,
    pub proposer: SignerId,
}

/// A validator's signed agreement with a proposed entity frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precommit {
    pub signer: SignerId,
    pub height: u64,
    pub frame_hash: StateHash,
    pub sig: Ed25519Signature,
}
