use thiserror::Error;

use crate::types::{FrameId, Nonce, TokenId};

/// Propagation class of an [`XlnError`], per the error-handling design:
/// each class has one rule for how far the failure travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reject the single tx; record it in the failed-tx ring; inform the peer.
    Validation,
    /// Reject the whole frame; the sender rolls back; no state change.
    Capacity,
    /// Fatal for the account; it enters Disputing and refuses further frames.
    FrameMismatch,
    /// Fatal for the replica; both encoded states are dumped, participation halts.
    ConsensusDivergence,
    /// Drop the duplicate; an observable counter is incremented.
    Replay,
    /// Storage or serialization failure outside consensus logic.
    Storage,
}

#[derive(Debug, Error)]
pub enum XlnError {
    // ── Tx validation ────────────────────────────────────────────────────────
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("amount must not be negative")]
    NegativeAmount,

    #[error("token {0} is not tracked by this account")]
    UnknownToken(TokenId),

    #[error("token {0} is already tracked by this account")]
    TokenAlreadyTracked(TokenId),

    #[error("unknown hash-lock: {0}")]
    UnknownLock(u64),

    #[error("hash-lock {0} already exists")]
    DuplicateLock(u64),

    #[error("hash-lock {id} has expired at height {expiry}")]
    LockExpired { id: u64, expiry: u64 },

    #[error("hash-lock {id} has not expired yet (expires at height {expiry})")]
    LockNotExpired { id: u64, expiry: u64 },

    #[error("preimage does not hash to the lock commitment")]
    BadPreimage,

    #[error("only the lock beneficiary may settle or decline it before expiry")]
    LockNotBeneficiary,

    #[error("unknown swap offer: {0}")]
    UnknownSwapOffer(u64),

    #[error("swap offer {0} already exists")]
    DuplicateSwapOffer(u64),

    #[error("swap offer {id} fill would exceed the whole offer: filled {filled}, requested {requested}")]
    SwapOverfill { id: u64, filled: u32, requested: u32 },

    #[error("only the offer maker may cancel a swap offer")]
    SwapCancelNotMaker,

    #[error("only the counterparty of the offer maker may fill a swap offer")]
    SwapFillNotTaker,

    #[error("swap offer {0} is partially filled and can no longer be cancelled")]
    SwapAlreadyFilled(u64),

    #[error("withdrawal allowance exceeds collateral")]
    AllowanceExceedsCollateral,

    #[error("chat message exceeds maximum length of {max} bytes")]
    ChatTooLong { max: usize },

    #[error("unknown proposal: {0}")]
    UnknownProposal(u64),

    #[error("proposal {0} is not open for voting")]
    ProposalNotOpen(u64),

    #[error("proposal {0} has not reached the execution threshold")]
    ProposalThresholdNotMet(u64),

    #[error("unknown account with counterparty {0}")]
    UnknownAccount(String),

    #[error("account with counterparty {0} already open")]
    AccountAlreadyOpen(String),

    #[error("account is closing; only settle_lock / cancel_lock accepted")]
    AccountClosing,

    #[error("account is closed")]
    AccountClosed,

    #[error("account is in dispute; no further frames accepted")]
    AccountDisputing,

    #[error("close not requested; approve_close requires a prior request_close")]
    CloseNotRequested,

    #[error("{0} hash-locks still outstanding; settle or cancel them before closing")]
    LocksOutstanding(usize),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: Nonce, got: Nonce },

    #[error("signer {0} is not in the validator set")]
    UnknownSigner(String),

    // ── Capacity ─────────────────────────────────────────────────────────────
    #[error("capacity violated for token {token_id}: delta {delta} outside [{lower}, {upper}]")]
    CapacityViolation {
        token_id: TokenId,
        delta: String,
        lower: String,
        upper: String,
    },

    // ── Bilateral frame protocol ─────────────────────────────────────────────
    #[error("frame {frame_id}: prevStateHash mismatch (ours {ours}, theirs {theirs})")]
    PrevStateHashMismatch {
        frame_id: FrameId,
        ours: String,
        theirs: String,
    },

    #[error("frame {frame_id}: postStateHash mismatch after replay")]
    PostStateHashMismatch { frame_id: FrameId },

    #[error("frame {got} out of sequence (expected {expected})")]
    FrameOutOfSequence { expected: FrameId, got: FrameId },

    #[error("no pending frame to acknowledge")]
    NoPendingFrame,

    // ── Entity consensus ─────────────────────────────────────────────────────
    #[error("entity state diverged at height {height}: proposer {proposer_hash}, local {local_hash}")]
    ConsensusDivergence {
        height: u64,
        proposer_hash: String,
        local_hash: String,
    },

    #[error("replica has halted after divergence and refuses the frame")]
    ReplicaHalted,

    // ── Replay ───────────────────────────────────────────────────────────────
    #[error("duplicate delivery dropped: {0}")]
    ReplayDetected(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl XlnError {
    /// Propagation class of this error. Internal invariant breaks do not
    /// appear here: they abort via `panic!` and are never propagated.
    pub fn class(&self) -> ErrorClass {
        use XlnError::*;
        match self {
            CapacityViolation { .. } => ErrorClass::Capacity,
            PrevStateHashMismatch { .. } => ErrorClass::FrameMismatch,
            ConsensusDivergence { .. } | ReplicaHalted => ErrorClass::ConsensusDivergence,
            ReplayDetected(_) => ErrorClass::Replay,
            Serialization(_) | Storage(_) => ErrorClass::Storage,
            _ => ErrorClass::Validation,
        }
    }
}
