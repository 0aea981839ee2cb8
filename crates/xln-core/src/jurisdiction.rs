//! Jurisdiction boundary types.
//!
//! The core never talks to a chain directly. It observes events (fed in as
//! `observe_jurisdiction` entity txs, idempotent by `(tx_hash, log_index)`)
//! and produces intents the runtime caller turns into contract calls.

use serde::{Deserialize, Serialize};

use crate::frame::CommittedAccountFrame;
use crate::types::{Amount, EntityId, TokenId};

// ── Observed events ──────────────────────────────────────────────────────────

/// One decoded jurisdiction contract event with its dedup key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEvent {
    pub tx_hash: [u8; 32],
    pub log_index: u32,
    pub event: JurisdictionEvent,
}

/// The event schema the core subscribes to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JurisdictionEvent {
    EntityRegistered {
        entity_number: u64,
        board_hash: [u8; 32],
    },
    GovernanceEnabled {
        entity_id: EntityId,
        control_token_id: TokenId,
        dividend_token_id: TokenId,
    },
    ReserveUpdated {
        entity_id: EntityId,
        token_id: TokenId,
        new_amount: Amount,
    },
    SettlementProcessed {
        left_entity: EntityId,
        right_entity: EntityId,
        token_id: TokenId,
        new_collateral: Amount,
        new_ondelta: Amount,
    },
}

// ── Produced intents ─────────────────────────────────────────────────────────

/// Per-token settlement arguments for a `cooperativeUpdate` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDiff {
    pub token_id: TokenId,
    /// Signed change to the left party's reserve.
    pub left_diff: Amount,
    /// Signed change to the right party's reserve.
    pub right_diff: Amount,
    /// Change to the locked collateral.
    pub collateral_diff: Amount,
    /// Shift between ondelta and offdelta.
    pub ondelta_diff: Amount,
}

/// Optional insurance registration rider on a cooperative update.
/// On-chain semantics live in the jurisdiction contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceRegistration {
    pub token_id: TokenId,
    pub beneficiary: EntityId,
    pub amount: Amount,
}

/// Tokens whose residual debt both sides agree to forgive at settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgivenDebt {
    pub token_id: TokenId,
    pub amount: Amount,
}

/// The dispute proof: the last bilaterally signed frame. The contract
/// replays `frame.txs` from `prev_state_hash` and must reach
/// `post_state_hash` before enforcing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeProof {
    pub committed: CommittedAccountFrame,
    pub cooperative_nonce: u64,
    pub dispute_nonce: u64,
}

/// Abstract jurisdiction calls an entity emits after commit; the runtime
/// caller performs the actual I/O between ticks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JurisdictionIntent {
    CooperativeUpdate {
        left_entity: EntityId,
        right_entity: EntityId,
        diffs: Vec<SettlementDiff>,
        cooperative_nonce: u64,
        insurance: Vec<InsuranceRegistration>,
        forgiven_debts: Vec<ForgivenDebt>,
    },
    Dispute {
        left_entity: EntityId,
        right_entity: EntityId,
        proof: DisputeProof,
    },
}
