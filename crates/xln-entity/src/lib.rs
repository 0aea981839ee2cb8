//! The entity layer: replica state, weighted proposer/validator consensus
//! and deterministic entity tx application.

pub mod apply;
pub mod machine;
pub mod state;

pub use apply::{apply_entity_txs, ApplyCtx, Outbox};
pub use machine::{EntityMachine, EntityMessage, StepOutput};
pub use state::{
    ConsensusConfig, ConsensusMode, EntityState, FailedItem, FailedTx, Proposal, ProposalStatus,
};
