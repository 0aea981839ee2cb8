//! Core data model for the XLN bilateral settlement network.
//!
//! Defines the identifiers, per-token [`delta::Delta`] state, transaction
//! tagged unions, frame records and jurisdiction boundary types shared by
//! every layer of the state machine. No I/O and no hashing lives here; the
//! canonical encoding and Keccak roots are in `xln-codec`.

pub mod constants;
pub mod delta;
pub mod error;
pub mod frame;
pub mod jurisdiction;
pub mod tx;
pub mod types;

pub use constants::*;
pub use delta::{CapacitySplit, Delta, HashLock, SwapOffer};
pub use error::{ErrorClass, XlnError};
pub use frame::{AccountFrame, AccountMessage, CommittedAccountFrame, EntityFrame, Precommit};
pub use jurisdiction::{
    DisputeProof, ForgivenDebt, InsuranceRegistration, JurisdictionEvent, JurisdictionIntent,
    ObservedEvent, SettlementDiff,
};
pub use tx::{
    is_canonically_sorted, sort_account_txs, sort_entity_txs, AccountOp, AccountTx, EntityOp,
    EntityTx, ProposalAction, VoteChoice,
};
pub use types::*;
