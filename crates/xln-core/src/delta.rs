//! Per-token bilateral account state.
//!
//! A [`Delta`] tracks one token inside one account: the on-chain collateral
//! backing it, the on- and off-chain committed deltas, the credit limits each
//! side extends to the other, and the withdrawal allowances. The derived
//! `delta` (including in-flight hash-locks) must stay inside the capacity
//! window after every committed frame.

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::XlnError;
use crate::types::{AccountSide, Amount, OfferId, TokenId};

// ── Delta ────────────────────────────────────────────────────────────────────

/// State of one token within a bilateral account.
///
/// Sign convention: positive `delta` means cumulative net flow from the left
/// party toward the right party. A direct payment from the left side
/// increases `offdelta`; one from the right side decreases it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub token_id: TokenId,
    /// Locked on-chain backing (never negative).
    pub collateral: Amount,
    /// On-chain committed delta.
    pub ondelta: Amount,
    /// Off-chain committed delta.
    pub offdelta: Amount,
    /// Credit the left side extends to the right.
    pub left_credit_limit: Amount,
    /// Credit the right side extends to the left.
    pub right_credit_limit: Amount,
    /// Withdrawal pre-approval, left side.
    pub left_allowence: Amount,
    /// Withdrawal pre-approval, right side.
    pub right_allowence: Amount,
}

impl Delta {
    pub fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            collateral: BigInt::zero(),
            ondelta: BigInt::zero(),
            offdelta: BigInt::zero(),
            left_credit_limit: BigInt::zero(),
            right_credit_limit: BigInt::zero(),
            left_allowence: BigInt::zero(),
            right_allowence: BigInt::zero(),
        }
    }

    /// The canonical derived delta:
    /// `ondelta + offdelta + Σ(active left locks) − Σ(active right locks)`.
    pub fn derived_delta(&self, locks: impl Iterator<Item = (AccountSide, Amount)>) -> Amount {
        let mut delta = &self.ondelta + &self.offdelta;
        for (side, amount) in locks {
            match side {
                AccountSide::Left => delta += amount,
                AccountSide::Right => delta -= amount,
            }
        }
        delta
    }

    /// Check the capacity invariant for a given derived delta:
    /// `−leftCreditLimit ≤ delta ≤ collateral + rightCreditLimit`.
    pub fn check_capacity(&self, delta: &Amount) -> Result<(), XlnError> {
        let lower = -&self.left_credit_limit;
        let upper = &self.collateral + &self.right_credit_limit;
        if *delta < lower || *delta > upper {
            return Err(XlnError::CapacityViolation {
                token_id: self.token_id,
                delta: delta.to_string(),
                lower: lower.to_string(),
                upper: upper.to_string(),
            });
        }
        Ok(())
    }

    /// Derived collateral/credit split, used for display and routing only.
    pub fn split(&self, delta: &Amount) -> CapacitySplit {
        let zero = BigInt::zero();
        let (in_credit, in_collateral, out_collateral, out_credit) = if *delta <= zero {
            (-delta, zero.clone(), self.collateral.clone(), zero.clone())
        } else if *delta <= self.collateral {
            (
                zero.clone(),
                delta.clone(),
                &self.collateral - delta,
                zero.clone(),
            )
        } else {
            (
                zero.clone(),
                self.collateral.clone(),
                zero.clone(),
                delta - &self.collateral,
            )
        };
        CapacitySplit {
            in_credit,
            in_collateral,
            out_collateral,
            out_credit,
            out_capacity: (&self.collateral - delta) + &self.right_credit_limit,
            in_capacity: delta + &self.left_credit_limit,
        }
    }
}

/// How the account's value for one token splits between collateral and
/// credit, from the left party's perspective.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapacitySplit {
    pub in_credit: Amount,
    pub in_collateral: Amount,
    pub out_collateral: Amount,
    pub out_credit: Amount,
    /// Remaining room for the left side to send.
    pub out_capacity: Amount,
    /// Remaining room for the left side to receive.
    pub in_capacity: Amount,
}

impl CapacitySplit {
    /// Total usable capacity of the account for this token.
    pub fn total_capacity(&self) -> Amount {
        &self.out_capacity + &self.in_capacity
    }
}

// ── HashLock ─────────────────────────────────────────────────────────────────

/// An HTLC-like conditional transfer: `amount` of `token_id` moves in the
/// locker's outbound direction once the preimage of `hash` is revealed
/// before `expiry_height`; after expiry it can only be cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashLock {
    pub offer_id: OfferId,
    pub token_id: TokenId,
    /// Keccak-256 commitment to the preimage.
    pub hash: [u8; 32],
    pub amount: Amount,
    /// Runtime height after which the lock is no longer settleable.
    pub expiry_height: u64,
    /// Which side locked the funds (determines the sign in derived delta).
    pub side: AccountSide,
}

// ── SwapOffer ────────────────────────────────────────────────────────────────

/// A conditional swap: the maker gives `give_amount` of `give_token` for
/// `want_amount` of `want_token`, fillable in fractions of 1/65535.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOffer {
    pub offer_id: OfferId,
    /// Which side placed the offer.
    pub side: AccountSide,
    pub give_token: TokenId,
    pub give_amount: Amount,
    pub want_token: TokenId,
    pub want_amount: Amount,
    /// Cumulative fill so far, in 1/65535 units of the whole offer.
    pub filled_ratio: u32,
}
