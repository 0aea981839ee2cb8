//! Transaction tagged unions for both machine layers.
//!
//! Every state-changing operation is a variant of [`AccountOp`] (bilateral
//! account layer) or [`EntityOp`] (entity consensus layer). The canonical
//! encoder serializes the discriminant explicitly, and within a frame txs are
//! applied in the total order `(nonce, submitter, kind, insertion index)` —
//! realized as a stable sort over the first three keys.

use serde::{Deserialize, Serialize};

use crate::frame::AccountMessage;
use crate::jurisdiction::ObservedEvent;
use crate::types::{AccountSide, Amount, EntityId, Nonce, OfferId, SignerId, TokenId};

// ── AccountTx ────────────────────────────────────────────────────────────────

/// A single bilateral account operation, stamped with the submitting side's
/// account-local nonce. The nonce is assigned when the entity layer
/// dispatches the op into the account mempool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTx {
    pub nonce: Nonce,
    pub from: AccountSide,
    pub op: AccountOp,
}

/// Every bilateral account operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountOp {
    /// Initialize deltas for the declared tokens; idempotent after first ack.
    OpenAccount { token_ids: Vec<TokenId> },

    /// Introduce tracking for a new token.
    AddDelta { token_id: TokenId },

    /// Update the submitting side's credit limit for one token.
    SetCreditLimit { token_id: TokenId, amount: Amount },

    /// Adjust `offdelta` by the amount, signed by the submitting side
    /// (left pays → offdelta increases, right pays → decreases).
    DirectPayment { token_id: TokenId, amount: Amount },

    /// Insert a pending hash-lock. The submitting side is the locker.
    AddLock {
        offer_id: OfferId,
        token_id: TokenId,
        hash: [u8; 32],
        amount: Amount,
        expiry_height: u64,
    },

    /// Reveal the preimage before expiry; converts the lock to offdelta.
    SettleLock { offer_id: OfferId, preimage: Vec<u8> },

    /// Drop a lock after expiry (or by mutual agreement before it).
    CancelLock { offer_id: OfferId },

    /// Insert a conditional swap offer (give A, want B).
    AddSwapOffer {
        offer_id: OfferId,
        give_token: TokenId,
        give_amount: Amount,
        want_token: TokenId,
        want_amount: Amount,
    },

    /// Counterparty fills a fraction of the whole offer, in 1/65535 units.
    /// Cumulative fills must not exceed the whole.
    FillSwapOffer { offer_id: OfferId, ratio: u32 },

    /// Remove a not-yet-filled offer. Maker only.
    CancelSwapOffer { offer_id: OfferId },

    /// Set the submitting side's withdrawal allowance for an on-chain pull.
    RequestWithdraw { token_id: TokenId, amount: Amount },

    /// Move the account to Closing; only settle_lock / cancel_lock thereafter.
    RequestClose,

    /// Move the account to Closed; produces cooperative settlement args.
    ApproveClose,
}

impl AccountOp {
    /// Canonical kind rank, third key of the tx ordering.
    pub fn kind_rank(&self) -> u8 {
        match self {
            AccountOp::OpenAccount { .. } => 0,
            AccountOp::AddDelta { .. } => 1,
            AccountOp::SetCreditLimit { .. } => 2,
            AccountOp::DirectPayment { .. } => 3,
            AccountOp::AddLock { .. } => 4,
            AccountOp::SettleLock { .. } => 5,
            AccountOp::CancelLock { .. } => 6,
            AccountOp::AddSwapOffer { .. } => 7,
            AccountOp::FillSwapOffer { .. } => 8,
            AccountOp::CancelSwapOffer { .. } => 9,
            AccountOp::RequestWithdraw { .. } => 10,
            AccountOp::RequestClose => 11,
            AccountOp::ApproveClose => 12,
        }
    }
}

/// Sort txs into the canonical application order. The sort is stable, so
/// txs equal on `(nonce, from, kind)` keep their first-seen order.
pub fn sort_account_txs(txs: &mut [AccountTx]) {
    txs.sort_by(|a, b| {
        (a.nonce, a.from, a.op.kind_rank()).cmp(&(b.nonce, b.from, b.op.kind_rank()))
    });
}

/// Whether a received batch already respects the canonical order.
pub fn is_canonically_sorted(txs: &[AccountTx]) -> bool {
    txs.windows(2).all(|w| {
        (w[0].nonce, w[0].from, w[0].op.kind_rank()) <= (w[1].nonce, w[1].from, w[1].op.kind_rank())
    })
}

// ── EntityTx ─────────────────────────────────────────────────────────────────

/// An entity-level operation, stamped with the submitting signer and that
/// signer's entity-local nonce (replay protection).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTx {
    pub signer: SignerId,
    pub nonce: Nonce,
    pub op: EntityOp,
}

/// Every entity-level operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityOp {
    /// User-visible text, capped at `MAX_CHAT_BYTES`.
    Chat { message: String },

    /// Open a governance proposal.
    Propose { action: ProposalAction },

    /// Vote on an open proposal.
    Vote {
        proposal_id: u64,
        choice: VoteChoice,
        comment: Option<String>,
    },

    /// Execute a proposal whose weighted yes-votes reached the threshold.
    Execute { proposal_id: u64 },

    /// Dispatch a bilateral account op to `accounts[counterparty]`.
    Account {
        counterparty: EntityId,
        op: AccountOp,
    },

    /// Apply an observed jurisdiction event (idempotent by tx hash + log index).
    ObserveJurisdiction { event: ObservedEvent },

    /// Create an AccountMachine toward `counterparty`; idempotent.
    OpenAccount { counterparty: EntityId },

    /// Inbound bilateral protocol message from `from`, routed through entity
    /// consensus so every replica applies it at the same height.
    AccountInput {
        from: EntityId,
        message: AccountMessage,
    },
}

impl EntityOp {
    /// Canonical kind rank, third key of the tx ordering.
    pub fn kind_rank(&self) -> u8 {
        match self {
            EntityOp::Chat { .. } => 0,
            EntityOp::Propose { .. } => 1,
            EntityOp::Vote { .. } => 2,
            EntityOp::Execute { .. } => 3,
            EntityOp::Account { .. } => 4,
            EntityOp::ObserveJurisdiction { .. } => 5,
            EntityOp::OpenAccount { .. } => 6,
            EntityOp::AccountInput { .. } => 7,
        }
    }
}

/// Sort entity txs into canonical order `(nonce, signer, kind, insertion)`.
pub fn sort_entity_txs(txs: &mut [EntityTx]) {
    txs.sort_by(|a, b| {
        (a.nonce, &a.signer, a.op.kind_rank()).cmp(&(b.nonce, &b.signer, b.op.kind_rank()))
    });
}

// ── Governance ───────────────────────────────────────────────────────────────

/// Actions a governance proposal can carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalAction {
    /// Change the weighted-signature commit threshold.
    SetThreshold { threshold: u64 },
    /// Add a validator with the given weight.
    AddValidator { signer: SignerId, weight: u64 },
    /// Remove a validator.
    RemoveValidator { signer: SignerId },
    /// Record a free-form note (no state effect beyond the proposal log).
    Note { text: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}
