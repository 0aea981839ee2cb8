//! The deterministic runtime: global ticks, message routing, snapshots and
//! replayable history.

pub mod context;
pub mod runtime;
pub mod snapshot;

pub use context::RuntimeContext;
pub use runtime::{Clock, Input, Runtime};
pub use snapshot::{CommittedAccountRecord, CommittedEntityRecord, Snapshot};
