//! ─── XLN Protocol Constants ─────────────────────────────────────────────────
//!
//! Bounds and timeouts shared by the account, entity and runtime layers.

// ── Bilateral frame protocol ─────────────────────────────────────────────────

/// Ticks a proposer waits for a FRAME_ACK before resending the identical
/// frame (same frameId and postStateHash, so the retry is idempotent).
pub const FRAME_RESEND_TICKS: u64 = 10;

/// Committed account frames retained per account. Older frames are pruned
/// once both sides have acked later ones; the latest committed frame (the
/// dispute proof) is never pruned.
pub const FRAME_HISTORY_LIMIT: usize = 64;

/// Denominator of the swap-offer fill ratio: 65535 = fully filled.
pub const SWAP_FILL_RATIO_BASE: u32 = 65_535;

// ── Entity layer ─────────────────────────────────────────────────────────────

/// Maximum byte length of a chat EntityTx payload.
pub const MAX_CHAT_BYTES: usize = 256;

/// Chat messages retained per entity (oldest evicted first).
pub const MAX_MESSAGES: usize = 100;

/// Failed transactions retained in the per-entity diagnostics ring.
pub const FAILED_TX_RING: usize = 32;

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Safety bound on `process_until_empty` iterations. Hitting it is a fatal
/// assertion, never silent: it means the machines are not quiescing.
pub const MAX_PROCESS_ITERATIONS: usize = 100;
