//! The bilateral account machine: per-pair state, tx application, the
//! propose/ack/rollback frame protocol and settlement argument building.

pub mod apply;
pub mod machine;
pub mod protocol;
pub mod settle;

pub use apply::{apply_frame_txs, apply_tx, check_all_capacity};
pub use machine::{AccountEffect, AccountMachine, AccountState, AccountStatus, PendingFrame};
pub use protocol::{ProtocolCtx, ProtocolStep};
pub use settle::close_diffs;
