//! Append-only snapshot log backed by sled (pure-Rust, no C dependencies).
//!
//! Named trees:
//!   snapshots — u64 be tick height → bincode(Snapshot)
//!   checksums — u64 be tick height → BLAKE3 of the snapshot bytes
//!
//! The log is append-only: a height can be written once; re-writing an
//! existing height with different bytes is refused. Replaying the log from
//! genesis must reproduce the identical global state hash.

use std::path::Path;

use tracing::info;

use xln_core::XlnError;
use xln_crypto::blake3_hash;
use xln_runtime::Snapshot;

pub struct SnapshotLog {
    _db: sled::Db,
    snapshots: sled::Tree,
    checksums: sled::Tree,
}

impl SnapshotLog {
    /// Open or create the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, XlnError> {
        let db = sled::open(path).map_err(|e| XlnError::Storage(e.to_string()))?;
        let snapshots = db
            .open_tree("snapshots")
            .map_err(|e| XlnError::Storage(e.to_string()))?;
        let checksums = db
            .open_tree("checksums")
            .map_err(|e| XlnError::Storage(e.to_string()))?;
        Ok(Self {
            _db: db,
            snapshots,
            checksums,
        })
    }

    /// Append one snapshot. Writing the same height twice with identical
    /// bytes is a no-op; with different bytes it is refused.
    pub fn append(&self, snapshot: &Snapshot) -> Result<(), XlnError> {
        let key = snapshot.height.to_be_bytes();
        let bytes =
            bincode::serialize(snapshot).map_err(|e| XlnError::Serialization(e.to_string()))?;

        if let Some(existing) = self
            .snapshots
            .get(key)
            .map_err(|e| XlnError::Storage(e.to_string()))?
        {
            if existing.as_ref() == bytes.as_slice() {
                return Ok(());
            }
            return Err(XlnError::Storage(format!(
                "height {} already logged with different bytes",
                snapshot.height
            )));
        }

        self.checksums
            .insert(key, &blake3_hash(&bytes))
            .map_err(|e| XlnError::Storage(e.to_string()))?;
        self.snapshots
            .insert(key, bytes)
            .map_err(|e| XlnError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Read one snapshot, verifying its checksum.
    pub fn get(&self, height: u64) -> Result<Option<Snapshot>, XlnError> {
        let key = height.to_be_bytes();
        let Some(bytes) = self
            .snapshots
            .get(key)
            .map_err(|e| XlnError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };
        let expected = self
            .checksums
            .get(key)
            .map_err(|e| XlnError::Storage(e.to_string()))?
            .ok_or_else(|| XlnError::Storage(format!("missing checksum for height {height}")))?;
        if expected.as_ref() != blake3_hash(&bytes).as_slice() {
            return Err(XlnError::Storage(format!(
                "checksum mismatch at height {height}"
            )));
        }
        let snapshot =
            bincode::deserialize(&bytes).map_err(|e| XlnError::Serialization(e.to_string()))?;
        Ok(Some(snapshot))
    }

    /// All snapshots in ascending height order.
    pub fn iter_all(&self) -> Result<Vec<Snapshot>, XlnError> {
        let mut out = Vec::new();
        for entry in self.snapshots.iter() {
            let (key, _) = entry.map_err(|e| XlnError::Storage(e.to_string()))?;
            let mut height_bytes = [0u8; 8];
            height_bytes.copy_from_slice(&key);
            let height = u64::from_be_bytes(height_bytes);
            let snapshot = self
                .get(height)?
                .ok_or_else(|| XlnError::Storage(format!("missing snapshot {height}")))?;
            out.push(snapshot);
        }
        Ok(out)
    }

    /// Highest logged height, if any.
    pub fn last_height(&self) -> Result<Option<u64>, XlnError> {
        match self
            .snapshots
            .last()
            .map_err(|e| XlnError::Storage(e.to_string()))?
        {
            Some((key, _)) => {
                let mut height_bytes = [0u8; 8];
                height_bytes.copy_from_slice(&key);
                Ok(Some(u64::from_be_bytes(height_bytes)))
            }
            None => Ok(None),
        }
    }

    /// Persist a full run's history.
    pub fn append_history(&self, history: &[Snapshot]) -> Result<(), XlnError> {
        for snapshot in history {
            self.append(snapshot)?;
        }
        info!(count = history.len(), "history persisted");
        Ok(())
    }
}
