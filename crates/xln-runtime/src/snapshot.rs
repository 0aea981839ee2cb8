//! Per-tick snapshot records.
//!
//! One [`Snapshot`] is appended to history per tick. The log is append-only
//! and byte-deterministic: a fresh runtime built from the same genesis,
//! re-fed the external inputs at the same ticks, reaches the identical
//! global state hash.

use serde::{Deserialize, Serialize};

use xln_core::frame::{CommittedAccountFrame, EntityFrame};
use xln_core::jurisdiction::JurisdictionIntent;
use xln_core::types::{EntityId, SignerId, StateHash, Timestamp};

use crate::runtime::Input;

/// An entity frame committed by one replica during a tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEntityRecord {
    pub entity: EntityId,
    pub signer: SignerId,
    pub frame: EntityFrame,
}

/// An account frame committed by one replica during a tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedAccountRecord {
    pub entity: EntityId,
    pub signer: SignerId,
    pub counterparty: EntityId,
    pub frame: CommittedAccountFrame,
}

/// Everything that happened in one tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tick index, starting at 1.
    pub height: u64,
    pub timestamp: Timestamp,
    /// Inputs drained from the inbox this tick, in arrival order.
    pub inbound: Vec<Input>,
    pub committed_entity_frames: Vec<CommittedEntityRecord>,
    pub committed_account_frames: Vec<CommittedAccountRecord>,
    /// Jurisdiction intents released this tick.
    pub outbound_intents: Vec<JurisdictionIntent>,
    /// Global state hash over all replicas after the tick.
    pub state_hash: StateHash,
}
