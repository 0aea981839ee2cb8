//! The canonical deterministic encoder.
//!
//! One encoding feeds all hashing, signing and the bilateral byte-equality
//! invariant. The schema, in full:
//!
//! - **Unsigned integer**: minimal big-endian magnitude (empty for zero),
//!   emitted as a byte string.
//! - **Signed integer**: minimal two's-complement big-endian (empty for
//!   zero), emitted as a byte string.
//! - **Byte string**: 4-byte big-endian length, then the raw bytes.
//! - **Boolean**: single raw byte `0x00` / `0x01`.
//! - **List**: 4-byte big-endian element count, then the elements.
//! - **Map**: encoded as a list of entries in ascending key order.
//! - **Enum**: single raw discriminant byte, then the variant's fields.
//! - **Option**: boolean presence flag, then the value if present.
//!
//! No floating point exists anywhere in the model.

use num_bigint::BigInt;
use num_traits::Zero;

use xln_core::frame::{AccountFrame, AccountMessage, CommittedAccountFrame, EntityFrame};
use xln_core::jurisdiction::{
    DisputeProof, ForgivenDebt, InsuranceRegistration, JurisdictionEvent, JurisdictionIntent,
    ObservedEvent, SettlementDiff,
};
use xln_core::tx::{AccountOp, AccountTx, EntityOp, EntityTx, ProposalAction, VoteChoice};
use xln_core::types::{
    AccountSide, Ed25519Signature, EntityId, SignerId, StateHash,
};
use xln_core::{Delta, HashLock, SwapOffer};

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Append-only canonical byte sink.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_uint(&mut self, v: u64) {
        let be = v.to_be_bytes();
        let start = be.iter().position(|&b| b != 0).unwrap_or(be.len());
        self.put_bytes(&be[start..]);
    }

    pub fn put_bigint(&mut self, v: &BigInt) {
        if v.is_zero() {
            self.put_bytes(&[]);
        } else {
            self.put_bytes(&v.to_signed_bytes_be());
        }
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_discriminant(&mut self, d: u8) {
        self.buf.push(d);
    }

    pub fn put_count(&mut self, n: usize) {
        self.buf.extend_from_slice(&(n as u32).to_be_bytes());
    }

    pub fn put_list<T: CanonicalEncode>(&mut self, items: &[T]) {
        self.put_count(items.len());
        for item in items {
            item.encode(self);
        }
    }

    pub fn put_option<T: CanonicalEncode>(&mut self, v: &Option<T>) {
        match v {
            None => self.put_bool(false),
            Some(inner) => {
                self.put_bool(true);
                inner.encode(self);
            }
        }
    }
}

/// Types with a canonical byte representation.
pub trait CanonicalEncode {
    fn encode(&self, enc: &mut Encoder);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.finish()
    }
}

// ── Scalar impls ─────────────────────────────────────────────────────────────

impl CanonicalEncode for u64 {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(*self);
    }
}

impl CanonicalEncode for u32 {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(*self as u64);
    }
}

impl CanonicalEncode for bool {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bool(*self);
    }
}

impl CanonicalEncode for BigInt {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bigint(self);
    }
}

impl CanonicalEncode for Vec<u8> {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self);
    }
}

impl CanonicalEncode for String {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self.as_bytes());
    }
}

impl CanonicalEncode for [u8; 32] {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self);
    }
}

impl CanonicalEncode for EntityId {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self.as_bytes());
    }
}

impl CanonicalEncode for SignerId {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self.0.as_bytes());
    }
}

impl CanonicalEncode for StateHash {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self.as_bytes());
    }
}

impl CanonicalEncode for Ed25519Signature {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(&self.0);
    }
}

impl CanonicalEncode for AccountSide {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_discriminant(match self {
            AccountSide::Left => 0,
            AccountSide::Right => 1,
        });
    }
}

// ── Account data model ───────────────────────────────────────────────────────

impl CanonicalEncode for Delta {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.token_id);
        enc.put_bigint(&self.collateral);
        enc.put_bigint(&self.ondelta);
        enc.put_bigint(&self.offdelta);
        enc.put_bigint(&self.left_credit_limit);
        enc.put_bigint(&self.right_credit_limit);
        enc.put_bigint(&self.left_allowence);
        enc.put_bigint(&self.right_allowence);
    }
}

impl CanonicalEncode for HashLock {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.offer_id);
        enc.put_uint(self.token_id);
        enc.put_bytes(&self.hash);
        enc.put_bigint(&self.amount);
        enc.put_uint(self.expiry_height);
        self.side.encode(enc);
    }
}

impl CanonicalEncode for SwapOffer {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.offer_id);
        self.side.encode(enc);
        enc.put_uint(self.give_token);
        enc.put_bigint(&self.give_amount);
        enc.put_uint(self.want_token);
        enc.put_bigint(&self.want_amount);
        enc.put_uint(self.filled_ratio as u64);
    }
}

// ── Transactions ─────────────────────────────────────────────────────────────

impl CanonicalEncode for AccountOp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_discriminant(self.kind_rank());
        match self {
            AccountOp::OpenAccount { token_ids } => {
                enc.put_count(token_ids.len());
                for id in token_ids {
                    enc.put_uint(*id);
                }
            }
            AccountOp::AddDelta { token_id } => enc.put_uint(*token_id),
            AccountOp::SetCreditLimit { token_id, amount } => {
                enc.put_uint(*token_id);
                enc.put_bigint(amount);
            }
            AccountOp::DirectPayment { token_id, amount } => {
                enc.put_uint(*token_id);
                enc.put_bigint(amount);
            }
            AccountOp::AddLock {
                offer_id,
                token_id,
                hash,
                amount,
                expiry_height,
            } => {
                enc.put_uint(*offer_id);
                enc.put_uint(*token_id);
                enc.put_bytes(hash);
                enc.put_bigint(amount);
                enc.put_uint(*expiry_height);
            }
            AccountOp::SettleLock { offer_id, preimage } => {
                enc.put_uint(*offer_id);
                enc.put_bytes(preimage);
            }
            AccountOp::CancelLock { offer_id } => enc.put_uint(*offer_id),
            AccountOp::AddSwapOffer {
                offer_id,
                give_token,
                give_amount,
                want_token,
                want_amount,
            } => {
                enc.put_uint(*offer_id);
                enc.put_uint(*give_token);
                enc.put_bigint(give_amount);
                enc.put_uint(*want_token);
                enc.put_bigint(want_amount);
            }
            AccountOp::FillSwapOffer { offer_id, ratio } => {
                enc.put_uint(*offer_id);
                enc.put_uint(*ratio as u64);
            }
            AccountOp::CancelSwapOffer { offer_id } => enc.put_uint(*offer_id),
            AccountOp::RequestWithdraw { token_id, amount } => {
                enc.put_uint(*token_id);
                enc.put_bigint(amount);
            }
            AccountOp::RequestClose => {}
            AccountOp::ApproveClose => {}
        }
    }
}

impl CanonicalEncode for AccountTx {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.nonce);
        self.from.encode(enc);
        self.op.encode(enc);
    }
}

impl CanonicalEncode for ProposalAction {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            ProposalAction::SetThreshold { threshold } => {
                enc.put_discriminant(0);
                enc.put_uint(*threshold);
            }
            ProposalAction::AddValidator { signer, weight } => {
                enc.put_discriminant(1);
                signer.encode(enc);
                enc.put_uint(*weight);
            }
            ProposalAction::RemoveValidator { signer } => {
                enc.put_discriminant(2);
                signer.encode(enc);
            }
            ProposalAction::Note { text } => {
                enc.put_discriminant(3);
                text.encode(enc);
            }
        }
    }
}

impl CanonicalEncode for VoteChoice {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_discriminant(match self {
            VoteChoice::Yes => 0,
            VoteChoice::No => 1,
            VoteChoice::Abstain => 2,
        });
    }
}

impl CanonicalEncode for EntityOp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_discriminant(self.kind_rank());
        match self {
            EntityOp::Chat { message } => message.encode(enc),
            EntityOp::Propose { action } => action.encode(enc),
            EntityOp::Vote {
                proposal_id,
                choice,
                comment,
            } => {
                enc.put_uint(*proposal_id);
                choice.encode(enc);
                enc.put_option(comment);
            }
            EntityOp::Execute { proposal_id } => enc.put_uint(*proposal_id),
            EntityOp::Account { counterparty, op } => {
                counterparty.encode(enc);
                op.encode(enc);
            }
            EntityOp::ObserveJurisdiction { event } => event.encode(enc),
            EntityOp::OpenAccount { counterparty } => counterparty.encode(enc),
            EntityOp::AccountInput { from, message } => {
                from.encode(enc);
                message.encode(enc);
            }
        }
    }
}

impl CanonicalEncode for EntityTx {
    fn encode(&self, enc: &mut Encoder) {
        self.signer.encode(enc);
        enc.put_uint(self.nonce);
        self.op.encode(enc);
    }
}

// ── Frames and messages ──────────────────────────────────────────────────────

impl CanonicalEncode for AccountFrame {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.frame_id);
        enc.put_uint(self.timestamp);
        self.prev_state_hash.encode(enc);
        enc.put_list(&self.txs);
        self.post_state_hash.encode(enc);
        enc.put_bool(self.proposer_is_left);
    }
}

impl CanonicalEncode for CommittedAccountFrame {
    fn encode(&self, enc: &mut Encoder) {
        self.frame.encode(enc);
        self.left_sig.encode(enc);
        self.right_sig.encode(enc);
    }
}

impl CanonicalEncode for AccountMessage {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            AccountMessage::FramePropose { frame, sig } => {
                enc.put_discriminant(0);
                frame.encode(enc);
                sig.encode(enc);
            }
            AccountMessage::FrameAck {
                frame_id,
                post_state_hash,
                sig,
            } => {
                enc.put_discriminant(1);
                enc.put_uint(*frame_id);
                post_state_hash.encode(enc);
                sig.encode(enc);
            }
            AccountMessage::FrameNack { frame_id, reason } => {
                enc.put_discriminant(2);
                enc.put_uint(*frame_id);
                reason.encode(enc);
            }
        }
    }
}

impl CanonicalEncode for EntityFrame {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.height);
        enc.put_uint(self.timestamp);
        self.prev_state_hash.encode(enc);
        enc.put_list(&self.txs);
        self.post_state_hash.encode(enc);
        self.proposer.encode(enc);
    }
}

// ── Jurisdiction boundary ────────────────────────────────────────────────────

impl CanonicalEncode for JurisdictionEvent {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            JurisdictionEvent::EntityRegistered {
                entity_number,
                board_hash,
            } => {
                enc.put_discriminant(0);
                enc.put_uint(*entity_number);
                enc.put_bytes(board_hash);
            }
            JurisdictionEvent::GovernanceEnabled {
                entity_id,
                control_token_id,
                dividend_token_id,
            } => {
                enc.put_discriminant(1);
                entity_id.encode(enc);
                enc.put_uint(*control_token_id);
                enc.put_uint(*dividend_token_id);
            }
            JurisdictionEvent::ReserveUpdated {
                entity_id,
                token_id,
                new_amount,
            } => {
                enc.put_discriminant(2);
                entity_id.encode(enc);
                enc.put_uint(*token_id);
                enc.put_bigint(new_amount);
            }
            JurisdictionEvent::SettlementProcessed {
                left_entity,
                right_entity,
                token_id,
                new_collateral,
                new_ondelta,
            } => {
                enc.put_discriminant(3);
                left_entity.encode(enc);
                right_entity.encode(enc);
                enc.put_uint(*token_id);
                enc.put_bigint(new_collateral);
                enc.put_bigint(new_ondelta);
            }
        }
    }
}

impl CanonicalEncode for ObservedEvent {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(&self.tx_hash);
        enc.put_uint(self.log_index as u64);
        self.event.encode(enc);
    }
}

impl CanonicalEncode for SettlementDiff {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.token_id);
        enc.put_bigint(&self.left_diff);
        enc.put_bigint(&self.right_diff);
        enc.put_bigint(&self.collateral_diff);
        enc.put_bigint(&self.ondelta_diff);
    }
}

impl CanonicalEncode for InsuranceRegistration {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.token_id);
        self.beneficiary.encode(enc);
        enc.put_bigint(&self.amount);
    }
}

impl CanonicalEncode for ForgivenDebt {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uint(self.token_id);
        enc.put_bigint(&self.amount);
    }
}

impl CanonicalEncode for DisputeProof {
    fn encode(&self, enc: &mut Encoder) {
        self.committed.encode(enc);
        enc.put_uint(self.cooperative_nonce);
        enc.put_uint(self.dispute_nonce);
    }
}

impl CanonicalEncode for JurisdictionIntent {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            JurisdictionIntent::CooperativeUpdate {
                left_entity,
                right_entity,
                diffs,
                cooperative_nonce,
                insurance,
                forgiven_debts,
            } => {
                enc.put_discriminant(0);
                left_entity.encode(enc);
                right_entity.encode(enc);
                enc.put_list(diffs);
                enc.put_uint(*cooperative_nonce);
                enc.put_list(insurance);
                enc.put_list(forgiven_debts);
            }
            JurisdictionIntent::Dispute {
                left_entity,
                right_entity,
                proof,
            } => {
                enc.put_discriminant(1);
                left_entity.encode(enc);
                right_entity.encode(enc);
                proof.encode(enc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn uint_is_minimal_big_endian() {
        let mut enc = Encoder::new();
        enc.put_uint(0);
        enc.put_uint(1);
        enc.put_uint(256);
        // 0 → empty string; 1 → one byte; 256 → two bytes.
        assert_eq!(
            enc.finish(),
            vec![
                0, 0, 0, 0, // len 0
                0, 0, 0, 1, 1, // len 1, 0x01
                0, 0, 0, 2, 1, 0, // len 2, 0x0100
            ]
        );
    }

    #[test]
    fn bigint_zero_is_empty_and_sign_round_trips() {
        let mut enc = Encoder::new();
        enc.put_bigint(&BigInt::from(0));
        assert_eq!(enc.finish(), vec![0, 0, 0, 0]);

        // -1 encodes as a single 0xFF two's-complement byte.
        let mut enc = Encoder::new();
        enc.put_bigint(&BigInt::from(-1));
        assert_eq!(enc.finish(), vec![0, 0, 0, 1, 0xFF]);
    }

    #[test]
    fn equal_values_encode_equal_bytes() {
        let a = Delta::new(7);
        let b = Delta::new(7);
        assert_eq!(a.encode_to_vec(), b.encode_to_vec());
    }

    #[test]
    fn discriminant_distinguishes_kinds() {
        let close = AccountOp::RequestClose.encode_to_vec();
        let approve = AccountOp::ApproveClose.encode_to_vec();
        assert_ne!(close, approve);
        assert_eq!(close[0], 11);
        assert_eq!(approve[0], 12);
    }
}
