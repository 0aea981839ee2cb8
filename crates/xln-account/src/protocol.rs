//! The bilateral frame protocol.
//!
//! Relative to a pending frame each side is in one of three states: IDLE,
//! PROPOSING (we sent a frame, awaiting their signature) or ACKING (we
//! validated their frame and answered with ours). Simultaneous proposals are
//! resolved by left priority: the right side rolls back and acknowledges,
//! the left side ignores the colliding proposal. This breaks the deadlock
//! deterministically and guarantees progress.

use tracing::{debug, error, info, warn};

use xln_codec::frame_hash;
use xln_core::constants::FRAME_RESEND_TICKS;
use xln_core::frame::{AccountFrame, AccountMessage, CommittedAccountFrame};
use xln_core::tx::is_canonically_sorted;
use xln_core::types::{Ed25519PublicKey, Ed25519Signature, Timestamp};
use xln_core::{sort_account_txs, XlnError};
use xln_crypto::{verify, KeyPair};

use crate::apply::apply_frame_txs;
use crate::machine::{AccountEffect, AccountMachine, AccountStatus, PendingFrame};

/// Everything the protocol needs from its surroundings for one step.
pub struct ProtocolCtx<'a> {
    pub our_key: &'a KeyPair,
    pub their_key: &'a Ed25519PublicKey,
    /// Runtime timestamp (tick height); becomes the frame timestamp.
    pub now: Timestamp,
}

/// Messages to send plus deterministic effects for the owning entity.
pub type ProtocolStep = (Vec<AccountMessage>, Vec<AccountEffect>);

impl AccountMachine {
    /// Advance the protocol by at most one step: resend a stale pending
    /// frame, or propose a new one from the mempool.
    pub fn tick(&mut self, ctx: &ProtocolCtx) -> ProtocolStep {
        let resends = self.resend_due(ctx);
        if !resends.is_empty() {
            return (resends, Vec::new());
        }
        self.advance(ctx)
    }

    /// Re-emit the pending frame after the ack timeout. Identical frame,
    /// identical signature: the retry is idempotent on the receiver.
    pub fn resend_due(&mut self, ctx: &ProtocolCtx) -> Vec<AccountMessage> {
        if matches!(
            self.state.status,
            AccountStatus::Disputing | AccountStatus::Closed
        ) {
            return Vec::new();
        }
        let Some(pending) = &mut self.pending else {
            return Vec::new();
        };
        if ctx.now.saturating_sub(pending.sent_at) < FRAME_RESEND_TICKS {
            return Vec::new();
        }
        pending.sent_at = ctx.now;
        pending.resend_count += 1;
        debug!(
            counterparty = %self.counterparty,
            frame_id = pending.frame.frame_id,
            resend = pending.resend_count,
            "resending unacked frame"
        );
        vec![AccountMessage::FramePropose {
            frame: pending.frame.clone(),
            sig: pending.our_sig.clone(),
        }]
    }

    /// IDLE → PROPOSING if there is anything to frame. Driven from entity
    /// frame commits so that every replica's protocol state advances at the
    /// same consensus height.
    pub fn advance(&mut self, ctx: &ProtocolCtx) -> ProtocolStep {
        if matches!(
            self.state.status,
            AccountStatus::Disputing | AccountStatus::Closed
        ) {
            return (Vec::new(), Vec::new());
        }
        if self.pending.is_some() || self.mempool.is_empty() {
            return (Vec::new(), Vec::new());
        }
        self.propose(ctx)
    }

    /// IDLE → PROPOSING: frame up the mempool and send it.
    fn propose(&mut self, ctx: &ProtocolCtx) -> ProtocolStep {
        let mut txs: Vec<_> = self.mempool.drain(..).collect();
        sort_account_txs(&mut txs);

        // Build the batch greedily: a tx of ours that no longer validates
        // (capacity moved under it) is dropped and surfaced, not framed.
        let mut working = self.state.clone();
        let mut effects = Vec::new();
        let mut surviving = Vec::new();
        let mut dropped = Vec::new();
        for tx in txs {
            let mut trial = working.clone();
            match apply_frame_txs(&mut trial, std::slice::from_ref(&tx), ctx.now) {
                Ok(mut fx) => {
                    working = trial;
                    effects.append(&mut fx);
                    surviving.push(tx);
                }
                Err(e) => {
                    warn!(counterparty = %self.counterparty, error = %e, "dropping invalid local tx");
                    dropped.push((tx, e));
                }
            }
        }

        let out_effects: Vec<AccountEffect> = dropped
            .into_iter()
            .map(|(tx, e)| AccountEffect::TxsRejected {
                txs: vec![tx],
                reason: e.to_string(),
            })
            .collect();

        if surviving.is_empty() {
            return (Vec::new(), out_effects);
        }

        let frame = AccountFrame {
            frame_id: self.frame_id + 1,
            timestamp: ctx.now,
            prev_state_hash: self.state.root(),
            txs: surviving,
            post_state_hash: working.root(),
            proposer_is_left: self.is_left,
        };
        let our_sig = ctx.our_key.sign(frame_hash(&frame).as_bytes());

        debug!(
            counterparty = %self.counterparty,
            frame_id = frame.frame_id,
            txs = frame.txs.len(),
            "proposing frame"
        );
        self.pending = Some(PendingFrame {
            frame: frame.clone(),
            our_sig: our_sig.clone(),
            post_state: working,
            effects,
            sent_at: ctx.now,
            resend_count: 0,
        });
        (
            vec![AccountMessage::FramePropose { frame, sig: our_sig }],
            out_effects,
        )
    }

    /// Handle one inbound bilateral message.
    pub fn handle_message(&mut self, msg: AccountMessage, ctx: &ProtocolCtx) -> ProtocolStep {
        match msg {
            AccountMessage::FramePropose { frame, sig } => self.on_propose(frame, sig, ctx),
            AccountMessage::FrameAck {
                frame_id,
                post_state_hash,
                sig,
            } => self.on_ack(frame_id, post_state_hash, sig, ctx),
            AccountMessage::FrameNack { frame_id, reason } => self.on_nack(frame_id, reason),
        }
    }

    // ── FRAME_PROPOSE ────────────────────────────────────────────────────────

    fn on_propose(
        &mut self,
        frame: AccountFrame,
        sig: Ed25519Signature,
        ctx: &ProtocolCtx,
    ) -> ProtocolStep {
        match self.state.status {
            AccountStatus::Disputing => {
                return self.nack(frame.frame_id, XlnError::AccountDisputing)
            }
            AccountStatus::Closed => return self.nack(frame.frame_id, XlnError::AccountClosed),
            _ => {}
        }

        let expected = self.frame_id + 1;

        // Re-delivered frame we already committed: re-ack, drop as no-op.
        if frame.frame_id <= self.frame_id {
            if let Some(committed) = self
                .frame_history
                .iter()
                .find(|c| c.frame.frame_id == frame.frame_id)
            {
                if committed.frame.post_state_hash == frame.post_state_hash {
                    self.replay_drops += 1;
                    debug!(frame_id = frame.frame_id, "replayed frame, re-acking");
                    let our_sig = if self.is_left {
                        committed.left_sig.clone()
                    } else {
                        committed.right_sig.clone()
                    };
                    return (
                        vec![AccountMessage::FrameAck {
                            frame_id: frame.frame_id,
                            post_state_hash: frame.post_state_hash,
                            sig: our_sig,
                        }],
                        Vec::new(),
                    );
                }
            }
            return self.nack(
                frame.frame_id,
                XlnError::FrameOutOfSequence {
                    expected,
                    got: frame.frame_id,
                },
            );
        }
        if frame.frame_id > expected {
            return self.nack(
                frame.frame_id,
                XlnError::FrameOutOfSequence {
                    expected,
                    got: frame.frame_id,
                },
            );
        }

        // Simultaneous proposals: left priority.
        if self.pending.is_some() {
            if self.is_left {
                debug!("left ignores colliding proposal; right will roll back");
                return (Vec::new(), Vec::new());
            }
            let pending = self.pending.take().expect("pending frame present");
            self.rollback_count += 1;
            info!(
                counterparty = %self.counterparty,
                frame_id = pending.frame.frame_id,
                rollbacks = self.rollback_count,
                "rolling back to yield to left proposal"
            );
            // Re-queue rolled-back txs at the tail, original order preserved.
            self.mempool.extend(pending.frame.txs);
        }

        // A prev-hash mismatch is fatal: no state is mutated, the account is
        // marked for dispute, and no further frames are accepted.
        let our_root = self.state.root();
        if frame.prev_state_hash != our_root {
            error!(
                counterparty = %self.counterparty,
                frame_id = frame.frame_id,
                ours = %our_root,
                theirs = %frame.prev_state_hash,
                "prevStateHash mismatch, marking account for dispute"
            );
            self.state.status = AccountStatus::Disputing;
            let mut effects = Vec::new();
            if let Some(proof) = self.dispute_proof() {
                self.dispute_nonce += 1;
                effects.push(AccountEffect::Dispute { proof });
            }
            return (Vec::new(), effects);
        }

        if frame.proposer_is_left == self.is_left {
            return self.nack(frame.frame_id, XlnError::InvalidSignature);
        }
        let hash = frame_hash(&frame);
        if !verify(ctx.their_key, hash.as_bytes(), &sig) {
            return self.nack(frame.frame_id, XlnError::InvalidSignature);
        }
        if let Some(last) = self.last_committed() {
            if frame.timestamp < last.frame.timestamp {
                return self.nack(
                    frame.frame_id,
                    XlnError::ReplayDetected("frame timestamp not monotonic".into()),
                );
            }
        }
        if !is_canonically_sorted(&frame.txs) {
            return self.nack(
                frame.frame_id,
                XlnError::ReplayDetected("txs not canonically ordered".into()),
            );
        }

        // Speculative apply; the frame is atomic.
        let mut working = self.state.clone();
        let effects = match apply_frame_txs(&mut working, &frame.txs, frame.timestamp) {
            Ok(fx) => fx,
            Err(e) => return self.nack(frame.frame_id, e),
        };
        if working.root() != frame.post_state_hash {
            return self.nack(
                frame.frame_id,
                XlnError::PostStateHashMismatch {
                    frame_id: frame.frame_id,
                },
            );
        }

        // Commit locally and answer with our signature.
        let our_sig = ctx.our_key.sign(hash.as_bytes());
        let (left_sig, right_sig) = if self.is_left {
            (our_sig.clone(), sig)
        } else {
            (sig, our_sig.clone())
        };
        let frame_id = frame.frame_id;
        let post_state_hash = frame.post_state_hash;
        self.state = working;
        self.frame_id = frame_id;
        self.cooperative_nonce += 1;
        self.push_committed(CommittedAccountFrame {
            frame,
            left_sig,
            right_sig,
        });
        info!(
            counterparty = %self.counterparty,
            frame_id,
            "committed counterparty frame"
        );
        (
            vec![AccountMessage::FrameAck {
                frame_id,
                post_state_hash,
                sig: our_sig,
            }],
            effects,
        )
    }

    // ── FRAME_ACK ────────────────────────────────────────────────────────────

    fn on_ack(
        &mut self,
        frame_id: u64,
        post_state_hash: xln_core::types::StateHash,
        sig: Ed25519Signature,
        ctx: &ProtocolCtx,
    ) -> ProtocolStep {
        let matches_pending = self
            .pending
            .as_ref()
            .map(|p| p.frame.frame_id == frame_id && p.frame.post_state_hash == post_state_hash)
            .unwrap_or(false);
        if !matches_pending {
            self.replay_drops += 1;
            debug!(frame_id, "stale or duplicate ack dropped");
            return (Vec::new(), Vec::new());
        }

        let pending = self.pending.as_ref().expect("pending frame present");
        let hash = frame_hash(&pending.frame);
        if !verify(ctx.their_key, hash.as_bytes(), &sig) {
            warn!(frame_id, "ack carries an invalid signature, dropping");
            return (Vec::new(), Vec::new());
        }

        let pending = self.pending.take().expect("pending frame present");
        let (left_sig, right_sig) = if self.is_left {
            (pending.our_sig.clone(), sig)
        } else {
            (sig, pending.our_sig.clone())
        };
        self.state = pending.post_state;
        self.frame_id = frame_id;
        self.cooperative_nonce += 1;
        self.push_committed(CommittedAccountFrame {
            frame: pending.frame,
            left_sig,
            right_sig,
        });
        info!(counterparty = %self.counterparty, frame_id, "frame acked and committed");
        (Vec::new(), pending.effects)
    }

    // ── FRAME_NACK ───────────────────────────────────────────────────────────

    fn on_nack(&mut self, frame_id: u64, reason: String) -> ProtocolStep {
        let matches_pending = self
            .pending
            .as_ref()
            .map(|p| p.frame.frame_id == frame_id)
            .unwrap_or(false);
        if !matches_pending {
            self.replay_drops += 1;
            return (Vec::new(), Vec::new());
        }
        let pending = self.pending.take().expect("pending frame present");
        warn!(
            counterparty = %self.counterparty,
            frame_id,
            reason = %reason,
            "frame rejected by peer, dropping its txs"
        );
        (
            Vec::new(),
            vec![AccountEffect::TxsRejected {
                txs: pending.frame.txs,
                reason,
            }],
        )
    }

    fn nack(&self, frame_id: u64, err: XlnError) -> ProtocolStep {
        warn!(counterparty = %self.counterparty, frame_id, error = %err, "rejecting frame");
        (
            vec![AccountMessage::FrameNack {
                frame_id,
                reason: err.to_string(),
            }],
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use xln_core::tx::AccountOp;
    use xln_core::types::EntityId;

    fn eid(b: u8) -> EntityId {
        EntityId::from_bytes([b; 32])
    }

    struct Pair {
        left: AccountMachine,
        right: AccountMachine,
        left_key: KeyPair,
        right_key: KeyPair,
    }

    impl Pair {
        fn new() -> Self {
            let e1 = eid(1);
            let e2 = eid(2);
            Self {
                left: AccountMachine::new(&e1, e2),
                right: AccountMachine::new(&e2, e1),
                left_key: KeyPair::from_seed([0xA1; 32]),
                right_key: KeyPair::from_seed([0xB2; 32]),
            }
        }

        fn tick_left(&mut self, now: u64) -> ProtocolStep {
            let ctx = ProtocolCtx {
                our_key: &self.left_key,
                their_key: &self.right_key.public_key,
                now,
            };
            self.left.tick(&ctx)
        }

        fn tick_right(&mut self, now: u64) -> ProtocolStep {
            let ctx = ProtocolCtx {
                our_key: &self.right_key,
                their_key: &self.left_key.public_key,
                now,
            };
            self.right.tick(&ctx)
        }

        fn deliver_to_left(&mut self, msg: AccountMessage, now: u64) -> ProtocolStep {
            let ctx = ProtocolCtx {
                our_key: &self.left_key,
                their_key: &self.right_key.public_key,
                now,
            };
            self.left.handle_message(msg, &ctx)
        }

        fn deliver_to_right(&mut self, msg: AccountMessage, now: u64) -> ProtocolStep {
            let ctx = ProtocolCtx {
                our_key: &self.right_key,
                their_key: &self.left_key.public_key,
                now,
            };
            self.right.handle_message(msg, &ctx)
        }

        /// Run ticks and full message delivery until both sides are quiet.
        fn settle(&mut self, mut now: u64) -> u64 {
            for _ in 0..30 {
                now += 1;
                let (from_left, _) = self.tick_left(now);
                let (from_right, _) = self.tick_right(now);
                let mut quiet = from_left.is_empty() && from_right.is_empty();
                let mut to_left: Vec<AccountMessage> = from_right;
                let mut to_right: Vec<AccountMessage> = from_left;
                while !to_left.is_empty() || !to_right.is_empty() {
                    quiet = false;
                    let mut next_left = Vec::new();
                    let mut next_right = Vec::new();
                    for m in to_right.drain(..) {
                        let (replies, _) = self.deliver_to_right(m, now);
                        next_left.extend(replies);
                    }
                    for m in to_left.drain(..) {
                        let (replies, _) = self.deliver_to_left(m, now);
                        next_right.extend(replies);
                    }
                    to_left = next_left;
                    to_right = next_right;
                }
                if quiet && self.left.mempool.is_empty() && self.right.mempool.is_empty() {
                    break;
                }
            }
            now
        }
    }

    /// Sequential account setup: left opens and sets its limit, then right
    /// sets its own. Leaves both mempools empty and no rollbacks behind.
    fn open_and_fund(pair: &mut Pair) -> u64 {
        pair.left
            .submit(AccountOp::OpenAccount { token_ids: vec![1] })
            .unwrap();
        pair.left
            .submit(AccountOp::SetCreditLimit {
                token_id: 1,
                amount: BigInt::from(1_000_000i64),
            })
            .unwrap();
        let now = pair.settle(0);
        pair.right
            .submit(AccountOp::SetCreditLimit {
                token_id: 1,
                amount: BigInt::from(1_000_000i64),
            })
            .unwrap();
        pair.settle(now)
    }

    #[test]
    fn open_and_credit_converges_byte_identical() {
        let mut pair = Pair::new();
        let _ = open_and_fund(&mut pair);
        assert_eq!(pair.left.state.encode(), pair.right.state.encode());
        assert_eq!(pair.left.frame_id, pair.right.frame_id);
        assert_eq!(pair.left.frame_id, 2);
        let d = &pair.left.state.deltas[&1];
        assert_eq!(d.left_credit_limit, BigInt::from(1_000_000i64));
        assert_eq!(d.right_credit_limit, BigInt::from(1_000_000i64));
        assert_eq!(pair.left.rollback_count + pair.right.rollback_count, 0);
    }

    #[test]
    fn direct_payment_commits_on_both_sides() {
        let mut pair = Pair::new();
        let now = open_and_fund(&mut pair);
        pair.left
            .submit(AccountOp::DirectPayment {
                token_id: 1,
                amount: BigInt::from(200_000i64),
            })
            .unwrap();
        pair.settle(now);
        assert_eq!(
            pair.left.state.deltas[&1].offdelta,
            BigInt::from(200_000i64)
        );
        assert_eq!(pair.left.state.encode(), pair.right.state.encode());
    }

    #[test]
    fn simultaneous_proposals_right_rolls_back_once() {
        let mut pair = Pair::new();
        let now = open_and_fund(&mut pair);
        pair.left
            .submit(AccountOp::DirectPayment {
                token_id: 1,
                amount: BigInt::from(50_000i64),
            })
            .unwrap();
        pair.right
            .submit(AccountOp::DirectPayment {
                token_id: 1,
                amount: BigInt::from(30_000i64),
            })
            .unwrap();
        pair.settle(now);
        assert_eq!(pair.left.rollback_count, 0);
        assert_eq!(pair.right.rollback_count, 1);
        assert_eq!(
            pair.left.state.deltas[&1].offdelta,
            BigInt::from(20_000i64)
        );
        assert_eq!(pair.left.state.encode(), pair.right.state.encode());
    }

    #[test]
    fn replayed_propose_is_reacked_not_reapplied() {
        let mut pair = Pair::new();
        let now = open_and_fund(&mut pair);
        pair.left
            .submit(AccountOp::DirectPayment {
                token_id: 1,
                amount: BigInt::from(7i64),
            })
            .unwrap();
        let (msgs, _) = pair.tick_left(now + 1);
        let propose = msgs[0].clone();
        let (acks, _) = pair.deliver_to_right(propose.clone(), now + 1);
        for ack in acks {
            pair.deliver_to_left(ack, now + 1);
        }
        let committed = pair.right.state.encode();

        // Deliver the same propose again.
        let (replies, _) = pair.deliver_to_right(propose, now + 2);
        assert!(matches!(replies[0], AccountMessage::FrameAck { .. }));
        assert_eq!(pair.right.replay_drops, 1);
        assert_eq!(pair.right.state.encode(), committed);
    }

    #[test]
    fn corrupted_prev_hash_triggers_dispute_without_mutation() {
        let mut pair = Pair::new();
        let now = open_and_fund(&mut pair);
        pair.left
            .submit(AccountOp::DirectPayment {
                token_id: 1,
                amount: BigInt::from(5i64),
            })
            .unwrap();
        let (msgs, _) = pair.tick_left(now + 1);
        let AccountMessage::FramePropose { mut frame, sig } = msgs[0].clone() else {
            panic!("expected propose");
        };
        frame.prev_state_hash = xln_core::types::StateHash::from_bytes([0xEE; 32]);

        let before = pair.right.state.encode();
        let (replies, effects) =
            pair.deliver_to_right(AccountMessage::FramePropose { frame, sig }, now + 1);
        assert!(replies.is_empty());
        assert!(matches!(effects.as_slice(), [AccountEffect::Dispute { .. }]));
        assert_eq!(pair.right.state.status, AccountStatus::Disputing);
        // Status changed, but the committed deltas did not.
        let mut after = pair.right.state.clone();
        after.status = AccountStatus::Active;
        assert_eq!(after.encode(), before);
    }

    #[test]
    fn resend_after_timeout_is_idempotent() {
        let mut pair = Pair::new();
        let now = open_and_fund(&mut pair);
        pair.left
            .submit(AccountOp::DirectPayment {
                token_id: 1,
                amount: BigInt::from(9i64),
            })
            .unwrap();
        let (first, _) = pair.tick_left(now + 1);
        assert_eq!(first.len(), 1);

        // No ack arrives; after the timeout the identical frame goes again.
        let (resent, _) = pair.tick_left(now + 1 + FRAME_RESEND_TICKS);
        assert_eq!(first, resent);
        assert_eq!(pair.left.pending.as_ref().unwrap().resend_count, 1);
    }
}
