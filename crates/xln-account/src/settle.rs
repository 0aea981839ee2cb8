//! Settlement argument building.
//!
//! Cooperative close turns the committed account state into per-token
//! `cooperativeUpdate` diffs: the collateral is split by clamping the final
//! delta into `[0, collateral]` and any residual credit portion is settled
//! between the two reserves. The jurisdiction contract applies the diffs;
//! the core only builds them.

use num_bigint::BigInt;
use num_traits::Zero;

use xln_core::jurisdiction::SettlementDiff;

use crate::machine::AccountState;

/// Build the final cooperative-close diffs for every tracked token.
///
/// For each token, with `delta = ondelta + offdelta` (no locks remain at
/// close):
/// - the left party receives `clamp(delta, 0, collateral)` of collateral,
///   the right party the remainder;
/// - `delta > collateral` settles the excess from the right reserve;
/// - `delta < 0` settles the shortfall from the left reserve;
/// - collateral and ondelta are zeroed on chain.
pub fn close_diffs(state: &AccountState) -> Vec<SettlementDiff> {
    let zero = BigInt::zero();
    let mut diffs = Vec::with_capacity(state.deltas.len());

    for (token_id, delta) in &state.deltas {
        let d = &delta.ondelta + &delta.offdelta;

        let left_collateral = d.clone().max(zero.clone()).min(delta.collateral.clone());
        let right_collateral = &delta.collateral - &left_collateral;

        let mut left_diff = left_collateral;
        let mut right_diff = right_collateral;

        if d > delta.collateral {
            let out_credit = &d - &delta.collateral;
            left_diff += &out_credit;
            right_diff -= &out_credit;
        } else if d < zero {
            let in_credit = -&d;
            right_diff += &in_credit;
            left_diff -= &in_credit;
        }

        diffs.push(SettlementDiff {
            token_id: *token_id,
            left_diff,
            right_diff,
            collateral_diff: -&delta.collateral,
            ondelta_diff: -&delta.ondelta,
        });
    }

    diffs
}
