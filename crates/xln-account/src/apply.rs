//! Validation and application of account txs.
//!
//! A frame is atomic: txs are applied to a working copy of the committed
//! state, the capacity invariant is checked over every token at the end, and
//! only then does the caller install the result. Any failure leaves the
//! committed state untouched.

use num_bigint::BigInt;
use num_traits::Zero;

use xln_codec::keccak256;
use xln_core::tx::{AccountOp, AccountTx};
use xln_core::types::{AccountSide, Timestamp};
use xln_core::{Delta, HashLock, SwapOffer, XlnError, SWAP_FILL_RATIO_BASE};

use crate::machine::{AccountEffect, AccountState, AccountStatus};
use crate::settle::close_diffs;

/// Apply a canonically ordered tx batch to `state`.
///
/// `frame_ts` is the committing frame's timestamp; lock expiry is evaluated
/// against it so both sides reach the same verdict regardless of local
/// clocks.
pub fn apply_frame_txs(
    state: &mut AccountState,
    txs: &[AccountTx],
    frame_ts: Timestamp,
) -> Result<Vec<AccountEffect>, XlnError> {
    let mut effects = Vec::new();
    for tx in txs {
        apply_tx(state, tx, frame_ts, &mut effects)?;
    }
    check_all_capacity(state)?;
    Ok(effects)
}

/// Apply one tx. Nonces must be strictly increasing per submitting side;
/// gaps are permitted (the proposer may have dropped an invalid tx of its
/// own before framing).
pub fn apply_tx(
    state: &mut AccountState,
    tx: &AccountTx,
    frame_ts: Timestamp,
    effects: &mut Vec<AccountEffect>,
) -> Result<(), XlnError> {
    let expected = state.expected_nonce(tx.from);
    if tx.nonce < expected {
        return Err(XlnError::InvalidNonce {
            expected,
            got: tx.nonce,
        });
    }

    check_status_gate(state, &tx.op)?;
    apply_op(state, tx.from, &tx.op, frame_ts, effects)?;

    match tx.from {
        AccountSide::Left => state.left_nonce = tx.nonce + 1,
        AccountSide::Right => state.right_nonce = tx.nonce + 1,
    }
    Ok(())
}

/// Final capacity sweep over every tracked token.
pub fn check_all_capacity(state: &AccountState) -> Result<(), XlnError> {
    for (token_id, delta) in &state.deltas {
        let derived = state
            .derived_delta(*token_id)
            .expect("token is present in deltas map");
        delta.check_capacity(&derived)?;
    }
    Ok(())
}

fn check_status_gate(state: &AccountState, op: &AccountOp) -> Result<(), XlnError> {
    match state.status {
        AccountStatus::Active => Ok(()),
        AccountStatus::Closing => match op {
            AccountOp::SettleLock { .. }
            | AccountOp::CancelLock { .. }
            | AccountOp::ApproveClose => Ok(()),
            _ => Err(XlnError::AccountClosing),
        },
        AccountStatus::Closed => Err(XlnError::AccountClosed),
        AccountStatus::Disputing => Err(XlnError::AccountDisputing),
    }
}

fn apply_op(
    state: &mut AccountState,
    from: AccountSide,
    op: &AccountOp,
    frame_ts: Timestamp,
    effects: &mut Vec<AccountEffect>,
) -> Result<(), XlnError> {
    match op {
        // ── Token tracking ───────────────────────────────────────────────
        AccountOp::OpenAccount { token_ids } => {
            // Idempotent: tokens already tracked are left untouched.
            for id in token_ids {
                state.deltas.entry(*id).or_insert_with(|| Delta::new(*id));
            }
            Ok(())
        }

        AccountOp::AddDelta { token_id } => {
            if state.deltas.contains_key(token_id) {
                return Err(XlnError::TokenAlreadyTracked(*token_id));
            }
            state.deltas.insert(*token_id, Delta::new(*token_id));
            Ok(())
        }

        // ── Credit and payments ──────────────────────────────────────────
        AccountOp::SetCreditLimit { token_id, amount } => {
            if amount.sign() == num_bigint::Sign::Minus {
                return Err(XlnError::NegativeAmount);
            }
            let delta = state
                .deltas
                .get_mut(token_id)
                .ok_or(XlnError::UnknownToken(*token_id))?;
            match from {
                AccountSide::Left => delta.left_credit_limit = amount.clone(),
                AccountSide::Right => delta.right_credit_limit = amount.clone(),
            }
            Ok(())
        }

        AccountOp::DirectPayment { token_id, amount } => {
            if amount.is_zero() {
                return Err(XlnError::ZeroAmount);
            }
            if amount.sign() == num_bigint::Sign::Minus {
                return Err(XlnError::NegativeAmount);
            }
            let delta = state
                .deltas
                .get_mut(token_id)
                .ok_or(XlnError::UnknownToken(*token_id))?;
            match from {
                AccountSide::Left => delta.offdelta += amount,
                AccountSide::Right => delta.offdelta -= amount,
            }
            Ok(())
        }

        // ── Hash-locks ───────────────────────────────────────────────────
        AccountOp::AddLock {
            offer_id,
            token_id,
            hash,
            amount,
            expiry_height,
        } => {
            if amount.is_zero() {
                return Err(XlnError::ZeroAmount);
            }
            if amount.sign() == num_bigint::Sign::Minus {
                return Err(XlnError::NegativeAmount);
            }
            if !state.deltas.contains_key(token_id) {
                return Err(XlnError::UnknownToken(*token_id));
            }
            if state.locks.contains_key(offer_id) {
                return Err(XlnError::DuplicateLock(*offer_id));
            }
            if *expiry_height <= frame_ts {
                return Err(XlnError::LockExpired {
                    id: *offer_id,
                    expiry: *expiry_height,
                });
            }
            state.locks.insert(
                *offer_id,
                HashLock {
                    offer_id: *offer_id,
                    token_id: *token_id,
                    hash: *hash,
                    amount: amount.clone(),
                    expiry_height: *expiry_height,
                    side: from,
                },
            );
            Ok(())
        }

        AccountOp::SettleLock { offer_id, preimage } => {
            let lock = state
                .locks
                .get(offer_id)
                .ok_or(XlnError::UnknownLock(*offer_id))?;
            // Only the beneficiary reveals.
            if from != lock.side.other() {
                return Err(XlnError::LockNotBeneficiary);
            }
            if frame_ts >= lock.expiry_height {
                return Err(XlnError::LockExpired {
                    id: *offer_id,
                    expiry: lock.expiry_height,
                });
            }
            if keccak256(preimage) != lock.hash {
                return Err(XlnError::BadPreimage);
            }
            let lock = state.locks.remove(offer_id).expect("lock exists");
            let delta = state
                .deltas
                .get_mut(&lock.token_id)
                .ok_or(XlnError::UnknownToken(lock.token_id))?;
            match lock.side {
                AccountSide::Left => delta.offdelta += &lock.amount,
                AccountSide::Right => delta.offdelta -= &lock.amount,
            }
            Ok(())
        }

        AccountOp::CancelLock { offer_id } => {
            let lock = state
                .locks
                .get(offer_id)
                .ok_or(XlnError::UnknownLock(*offer_id))?;
            // After expiry either side may drop the lock; before expiry only
            // the beneficiary may decline it.
            if frame_ts < lock.expiry_height && from != lock.side.other() {
                return Err(XlnError::LockNotExpired {
                    id: *offer_id,
                    expiry: lock.expiry_height,
                });
            }
            state.locks.remove(offer_id);
            Ok(())
        }

        // ── Swap offers ──────────────────────────────────────────────────
        AccountOp::AddSwapOffer {
            offer_id,
            give_token,
            give_amount,
            want_token,
            want_amount,
        } => {
            if give_amount.is_zero() || want_amount.is_zero() {
                return Err(XlnError::ZeroAmount);
            }
            if give_amount.sign() == num_bigint::Sign::Minus
                || want_amount.sign() == num_bigint::Sign::Minus
            {
                return Err(XlnError::NegativeAmount);
            }
            if !state.deltas.contains_key(give_token) {
                return Err(XlnError::UnknownToken(*give_token));
            }
            if !state.deltas.contains_key(want_token) {
                return Err(XlnError::UnknownToken(*want_token));
            }
            if state.swap_offers.contains_key(offer_id) {
                return Err(XlnError::DuplicateSwapOffer(*offer_id));
            }
            state.swap_offers.insert(
                *offer_id,
                SwapOffer {
                    offer_id: *offer_id,
                    side: from,
                    give_token: *give_token,
                    give_amount: give_amount.clone(),
                    want_token: *want_token,
                    want_amount: want_amount.clone(),
                    filled_ratio: 0,
                },
            );
            Ok(())
        }

        AccountOp::FillSwapOffer { offer_id, ratio } => {
            let offer = state
                .swap_offers
                .get(offer_id)
                .ok_or(XlnError::UnknownSwapOffer(*offer_id))?;
            if from != offer.side.other() {
                return Err(XlnError::SwapFillNotTaker);
            }
            if *ratio == 0 {
                return Err(XlnError::ZeroAmount);
            }
            if offer.filled_ratio + ratio > SWAP_FILL_RATIO_BASE {
                return Err(XlnError::SwapOverfill {
                    id: *offer_id,
                    filled: offer.filled_ratio,
                    requested: *ratio,
                });
            }

            let give_part = (&offer.give_amount * BigInt::from(*ratio))
                / BigInt::from(SWAP_FILL_RATIO_BASE);
            let want_part = (&offer.want_amount * BigInt::from(*ratio))
                / BigInt::from(SWAP_FILL_RATIO_BASE);
            let (give_token, want_token, maker) =
                (offer.give_token, offer.want_token, offer.side);

            // Give leg moves in the maker's outbound direction; want leg in
            // the taker's.
            {
                let delta = state
                    .deltas
                    .get_mut(&give_token)
                    .ok_or(XlnError::UnknownToken(give_token))?;
                match maker {
                    AccountSide::Left => delta.offdelta += &give_part,
                    AccountSide::Right => delta.offdelta -= &give_part,
                }
            }
            {
                let delta = state
                    .deltas
                    .get_mut(&want_token)
                    .ok_or(XlnError::UnknownToken(want_token))?;
                match maker {
                    AccountSide::Left => delta.offdelta -= &want_part,
                    AccountSide::Right => delta.offdelta += &want_part,
                }
            }

            let offer = state
                .swap_offers
                .get_mut(offer_id)
                .expect("offer exists");
            offer.filled_ratio += ratio;
            if offer.filled_ratio == SWAP_FILL_RATIO_BASE {
                state.swap_offers.remove(offer_id);
            }
            Ok(())
        }

        AccountOp::CancelSwapOffer { offer_id } => {
            let offer = state
                .swap_offers
                .get(offer_id)
                .ok_or(XlnError::UnknownSwapOffer(*offer_id))?;
            if from != offer.side {
                return Err(XlnError::SwapCancelNotMaker);
            }
            if offer.filled_ratio != 0 {
                return Err(XlnError::SwapAlreadyFilled(*offer_id));
            }
            state.swap_offers.remove(offer_id);
            Ok(())
        }

        // ── Withdrawals and close ────────────────────────────────────────
        AccountOp::RequestWithdraw { token_id, amount } => {
            if amount.sign() == num_bigint::Sign::Minus {
                return Err(XlnError::NegativeAmount);
            }
            let delta = state
                .deltas
                .get_mut(token_id)
                .ok_or(XlnError::UnknownToken(*token_id))?;
            if *amount > delta.collateral {
                return Err(XlnError::AllowanceExceedsCollateral);
            }
            match from {
                AccountSide::Left => delta.left_allowence = amount.clone(),
                AccountSide::Right => delta.right_allowence = amount.clone(),
            }
            Ok(())
        }

        AccountOp::RequestClose => {
            // Swap offers are revocable promises; closing drops them.
            state.swap_offers.clear();
            state.status = AccountStatus::Closing;
            Ok(())
        }

        AccountOp::ApproveClose => {
            if state.status != AccountStatus::Closing {
                return Err(XlnError::CloseNotRequested);
            }
            if !state.locks.is_empty() {
                return Err(XlnError::LocksOutstanding(state.locks.len()));
            }
            let diffs = close_diffs(state);
            state.status = AccountStatus::Closed;
            effects.push(AccountEffect::CooperativeClose { diffs });
            Ok(())
        }
    }
}
