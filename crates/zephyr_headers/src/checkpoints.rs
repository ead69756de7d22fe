//! Embedded checkpoint table.
//!
//! Entry `i` pins the hash of the last header of retarget period `i`, i.e.
//! height `(i + 1) * interval - 1`. Everything up to the last pinned height is
//! the trust horizon: headers there are accepted on linkage and the pins, and
//! no fork may start inside it.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use zephyr_crypto::HashDigest;

use crate::error::{ChainError, Result};

pub const CHECKPOINT_INTERVAL: u32 = 2016;

/// One JSON entry: `{"hash": "<display hex>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CheckpointEntry {
    hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTable {
    hashes: Vec<HashDigest>,
    interval: u32,
}

impl Default for CheckpointTable {
    fn default() -> Self {
        CheckpointTable::empty()
    }
}

impl CheckpointTable {
    pub fn empty() -> Self {
        CheckpointTable {
            hashes: Vec::new(),
            interval: CHECKPOINT_INTERVAL,
        }
    }

    pub fn new(hashes: Vec<HashDigest>, interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(ChainError::Config("checkpoint interval must be non-zero".into()));
        }
        let table = CheckpointTable { hashes, interval };
        if !table.hashes.is_empty() && table.max_checkpoint_height().is_none() {
            return Err(ChainError::Config("checkpoint table exceeds the height range".into()));
        }
        Ok(table)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<CheckpointEntry> = serde_json::from_str(json)
            .map_err(|e| ChainError::Config(format!("checkpoint json: {e}")))?;
        let hashes = entries
            .iter()
            .map(|entry| {
                HashDigest::from_hex(&entry.hash).map_err(|e| {
                    ChainError::Config(format!("checkpoint hash {:?}: {e}", entry.hash))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        CheckpointTable::new(hashes, CHECKPOINT_INTERVAL)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| ChainError::storage(path, e))?;
        CheckpointTable::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Highest height covered by the table, `None` when the table is empty.
    ///
    /// An empty table has no horizon at all rather than one ending at height
    /// 0: genesis is already pinned by the network's genesis hash, and every
    /// later header must then pass proof of work.
    pub fn max_checkpoint_height(&self) -> Option<u32> {
        let entries = u32::try_from(self.hashes.len()).ok()?;
        entries.checked_mul(self.interval)?.checked_sub(1)
    }

    /// Whether `height` lies inside the trust horizon.
    pub fn covers(&self, height: u32) -> bool {
        self.max_checkpoint_height().is_some_and(|max| height <= max)
    }

    /// The pinned hash at `height`, if `height` is a pinned height.
    ///
    /// `None` for heights above the horizon (validate by difficulty instead)
    /// and for unpinned heights inside it.
    pub fn expected_hash(&self, height: u32) -> Option<HashDigest> {
        if !self.covers(height) {
            return None;
        }
        let period = height.checked_add(1)?;
        if period % self.interval != 0 {
            return None;
        }
        self.hashes.get((period / self.interval - 1) as usize).copied()
    }
}
