//! The per-pair account machine.
//!
//! One [`AccountMachine`] exists per ordered pair `(left, right)` of
//! entities, `left < right` lexicographically. It owns the cryptographic
//! account state and runs the bilateral frame protocol (see
//! [`crate::protocol`]). All mutation flows through committed frames; the
//! mempool and pending frame are the only non-committed state.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use xln_codec::{account_root, CanonicalEncode, Encoder};
use xln_core::constants::FRAME_HISTORY_LIMIT;
use xln_core::frame::CommittedAccountFrame;
use xln_core::jurisdiction::{DisputeProof, SettlementDiff};
use xln_core::tx::{AccountOp, AccountTx};
use xln_core::types::{
    AccountSide, EntityId, FrameId, Nonce, OfferId, StateHash, TokenId,
};
use xln_core::{Delta, HashLock, SwapOffer, XlnError};

// ── AccountStatus ────────────────────────────────────────────────────────────

/// Lifecycle of a bilateral account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    /// `request_close` committed; only settle_lock / cancel_lock / approve_close.
    Closing,
    Closed,
    /// A fatal prev-hash mismatch was observed; no further frames.
    Disputing,
}

// ── AccountState ─────────────────────────────────────────────────────────────

/// The committed, bilaterally agreed part of an account. This is the state
/// the byte-equality invariant covers: after every committed frame its
/// canonical encoding is identical on both sides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub deltas: BTreeMap<TokenId, Delta>,
    pub locks: BTreeMap<OfferId, HashLock>,
    pub swap_offers: BTreeMap<OfferId, SwapOffer>,
    pub status: AccountStatus,
    /// Next expected tx nonce from the left side.
    pub left_nonce: Nonce,
    /// Next expected tx nonce from the right side.
    pub right_nonce: Nonce,
}

impl AccountState {
    pub fn new() -> Self {
        Self {
            deltas: BTreeMap::new(),
            locks: BTreeMap::new(),
            swap_offers: BTreeMap::new(),
            status: AccountStatus::Active,
            left_nonce: 0,
            right_nonce: 0,
        }
    }

    /// Derived delta for one token, including in-flight locks.
    pub fn derived_delta(&self, token_id: TokenId) -> Option<xln_core::types::Amount> {
        let delta = self.deltas.get(&token_id)?;
        let locks = self
            .locks
            .values()
            .filter(|l| l.token_id == token_id)
            .map(|l| (l.side, l.amount.clone()));
        Some(delta.derived_delta(locks))
    }

    /// The account root over the deltas map (ascending token id).
    pub fn root(&self) -> StateHash {
        account_root(&self.deltas)
    }

    /// Canonical encoding of the committed account state: the deltas, locks,
    /// swap offers and lifecycle status. Both sides must produce identical
    /// bytes after every committed frame. Nonce counters are protocol
    /// bookkeeping (like `frame_id`) and stay outside the encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_count(self.deltas.len());
        for delta in self.deltas.values() {
            delta.encode(&mut enc);
        }
        enc.put_count(self.locks.len());
        for lock in self.locks.values() {
            lock.encode(&mut enc);
        }
        enc.put_count(self.swap_offers.len());
        for offer in self.swap_offers.values() {
            offer.encode(&mut enc);
        }
        enc.put_discriminant(match self.status {
            AccountStatus::Active => 0,
            AccountStatus::Closing => 1,
            AccountStatus::Closed => 2,
            AccountStatus::Disputing => 3,
        });
        enc.finish()
    }

    pub fn expected_nonce(&self, side: AccountSide) -> Nonce {
        match side {
            AccountSide::Left => self.left_nonce,
            AccountSide::Right => self.right_nonce,
        }
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Effects ──────────────────────────────────────────────────────────────────

/// Deterministic side effects of committing a frame, consumed by the owning
/// entity (which turns them into jurisdiction intents or failed-tx entries).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountEffect {
    /// `approve_close` committed: final cooperative settlement diffs.
    CooperativeClose { diffs: Vec<SettlementDiff> },
    /// A fatal prev-hash mismatch: submit the dispute proof on chain.
    Dispute { proof: DisputeProof },
    /// The peer rejected our proposed frame; these txs were dropped.
    TxsRejected { txs: Vec<AccountTx>, reason: String },
}

// ── Pending frame ────────────────────────────────────────────────────────────

/// Our proposed-but-unacked frame, with everything needed to commit it the
/// moment the counterparty's signature arrives.
#[derive(Clone, Debug)]
pub struct PendingFrame {
    pub frame: xln_core::frame::AccountFrame,
    pub our_sig: xln_core::types::Ed25519Signature,
    /// State after applying the frame's txs (installed on commit).
    pub post_state: AccountState,
    /// Effects produced by the frame's txs (surfaced on commit).
    pub effects: Vec<AccountEffect>,
    /// Runtime timestamp at which the frame was (re)sent.
    pub sent_at: u64,
    pub resend_count: u32,
}

// ── AccountMachine ───────────────────────────────────────────────────────────

/// One side's view of a bilateral account.
#[derive(Clone, Debug)]
pub struct AccountMachine {
    pub counterparty: EntityId,
    /// Whether we are the left party (`self < counterparty`); immutable.
    pub is_left: bool,
    /// Id of the last committed frame (0 = genesis, nothing committed).
    pub frame_id: FrameId,
    pub cooperative_nonce: u64,
    pub dispute_nonce: u64,
    pub state: AccountState,
    /// Our not-yet-framed txs, insertion order.
    pub mempool: Vec<AccountTx>,
    pub pending: Option<PendingFrame>,
    /// Committed frames, oldest first. Bounded; the newest is never pruned.
    pub frame_history: VecDeque<CommittedAccountFrame>,
    pub rollback_count: u32,
    /// Re-delivered frames and acks dropped as no-ops.
    pub replay_drops: u64,
    /// Frames committed since the runtime last drained this log (snapshot
    /// bookkeeping; not part of consensus state).
    pub fresh_committed: Vec<CommittedAccountFrame>,
    /// Our next account-local tx nonce.
    next_nonce: Nonce,
}

impl AccountMachine {
    pub fn new(our_entity: &EntityId, counterparty: EntityId) -> Self {
        let is_left = our_entity.is_left_of(&counterparty);
        Self {
            counterparty,
            is_left,
            frame_id: 0,
            cooperative_nonce: 0,
            dispute_nonce: 0,
            state: AccountState::new(),
            mempool: Vec::new(),
            pending: None,
            frame_history: VecDeque::new(),
            rollback_count: 0,
            replay_drops: 0,
            fresh_committed: Vec::new(),
            next_nonce: 0,
        }
    }

    pub fn our_side(&self) -> AccountSide {
        AccountSide::from_is_left(self.is_left)
    }

    /// Queue one of our ops for the next proposed frame, stamping it with
    /// the next account-local nonce. Rejected ops never enter the mempool.
    pub fn submit(&mut self, op: AccountOp) -> Result<(), XlnError> {
        match self.state.status {
            AccountStatus::Active => {}
            AccountStatus::Closing => {
                if !matches!(
                    op,
                    AccountOp::SettleLock { .. }
                        | AccountOp::CancelLock { .. }
                        | AccountOp::ApproveClose
                ) {
                    return Err(XlnError::AccountClosing);
                }
            }
            AccountStatus::Closed => return Err(XlnError::AccountClosed),
            AccountStatus::Disputing => return Err(XlnError::AccountDisputing),
        }
        let tx = AccountTx {
            nonce: self.next_nonce,
            from: self.our_side(),
            op,
        };
        self.next_nonce += 1;
        self.mempool.push(tx);
        Ok(())
    }

    /// The latest committed frame with both signatures, if any.
    pub fn last_committed(&self) -> Option<&CommittedAccountFrame> {
        self.frame_history.back()
    }

    /// Assemble the dispute proof from the latest committed frame.
    pub fn dispute_proof(&self) -> Option<DisputeProof> {
        Some(DisputeProof {
            committed: self.last_committed()?.clone(),
            cooperative_nonce: self.cooperative_nonce,
            dispute_nonce: self.dispute_nonce,
        })
    }

    /// Record a committed frame and prune history beyond the bound. Both
    /// sides have signed everything in history, so only the tail matters
    /// for disputes; the newest frame is always retained.
    pub(crate) fn push_committed(&mut self, committed: CommittedAccountFrame) {
        self.fresh_committed.push(committed.clone());
        self.frame_history.push_back(committed);
        while self.frame_history.len() > FRAME_HISTORY_LIMIT {
            self.frame_history.pop_front();
        }
    }
}
