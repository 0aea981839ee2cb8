//! Persistence: the append-only, byte-deterministic snapshot log.

pub mod log;

pub use log::SnapshotLog;
