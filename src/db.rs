//! Ledger snapshots in a sled database
//!
//! Each snapshot is the bincode encoding of a [`Ledger`] keyed by its
//! big-endian height, so the tree iterates in height order.

use crate::manager::Ledger;
use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt snapshot key")]
    CorruptKey,
}

pub struct Storage {
    db: Db,
    snapshots: Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// In-memory database removed on drop
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: Db) -> Result<Self, StorageError> {
        let snapshots = db.open_tree("snapshots")?;
        Ok(Self { db, snapshots })
    }

    /// Store the ledger at `height` and flush.
    pub fn save(&self, height: u64, ledger: &Ledger) -> Result<(), StorageError> {
        let bytes = bincode::serialize(ledger)?;
        let size = bytes.len();
        self.snapshots.insert(height.to_be_bytes(), bytes)?;
        self.db.flush()?;
        debug!("Snapshot {} stored ({} bytes)", height, size);
        Ok(())
    }

    pub fn load(&self, height: u64) -> Result<Option<Ledger>, StorageError> {
        match self.snapshots.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Highest stored snapshot
    pub fn latest(&self) -> Result<Option<(u64, Ledger)>, StorageError> {
        let Some((key, bytes)) = self.snapshots.last()? else {
            return Ok(None);
        };
        let height = decode_height(&key)?;
        Ok(Some((height, bincode::deserialize(&bytes)?)))
    }

    pub fn heights(&self) -> Result<Vec<u64>, StorageError> {
        let mut heights = Vec::new();
        for key in self.snapshots.iter().keys() {
            heights.push(decode_height(&key?)?);
        }
        Ok(heights)
    }

    /// Keep only the newest `keep` snapshots. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> Result<usize, StorageError> {
        let heights = self.heights()?;
        let excess = heights.len().saturating_sub(keep);
        for height in &heights[..excess] {
            self.snapshots.remove(height.to_be_bytes())?;
        }
        if excess > 0 {
            self.db.flush()?;
            info!("Pruned {} snapshots", excess);
        }
        Ok(excess)
    }
}

fn decode_height(key: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| StorageError::CorruptKey)?;
    Ok(u64::from_be_bytes(bytes))
}
