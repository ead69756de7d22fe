//! Header chains and the arena that holds them.
//!
//! A chain stores a contiguous run of headers `[forkpoint, tip]` in one flat
//! file and reaches every lower height through its parent. The canonical chain
//! (the root) has no parent and starts at genesis. Chains are addressed by
//! [`ChainId`], an index into the tree's arena that is never reused, so an id
//! stays valid across swaps even though the chain's forkpoint, parent and file
//! may change underneath it.
//!
//! Validation of a header at height `h`, as seen through chain `view`:
//!
//! 1. `h == 0`: the header hash must be the network genesis.
//! 2. Otherwise its previous hash must equal `view`'s hash at `h - 1`.
//! 3. Inside the checkpoint horizon a pinned height must match its pin; the
//!    remaining heights there are trusted on linkage.
//! 4. Above the horizon and below proof-of-stake activation, the hash must
//!    meet its target and `bits` must follow the retarget rule over the
//!    headers preceding `h`.
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};
use zephyr_crypto::{BitsSample, HashDigest, verify_pow};

use crate::error::{ChainError, Result};
use crate::fork_choice::ChainSummary;
use crate::header::{BlockHeader, hash_raw};
use crate::params::NetworkParameters;
use crate::store::{self, FlatFile, ForkName};

/// Stable handle on a chain inside one tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub(crate) usize);

impl ChainId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct HeaderChain {
    pub(crate) file: FlatFile,
    pub(crate) forkpoint: u32,
    pub(crate) forkpoint_hash: HashDigest,
    pub(crate) prev_hash: Option<HashDigest>,
    pub(crate) parent: Option<ChainId>,
    pub(crate) last_extended: u64,
}

impl HeaderChain {
    pub(crate) fn tip_height(&self) -> Option<u32> {
        (self.file.len() > 0).then(|| self.forkpoint + self.file.len() - 1)
    }

    /// Whether `height` is stored in this chain's own file.
    pub(crate) fn holds(&self, height: u32) -> bool {
        height >= self.forkpoint && height - self.forkpoint < self.file.len()
    }
}

/// Read-only snapshot of one chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    pub id: ChainId,
    pub forkpoint: u32,
    pub forkpoint_hash: HashDigest,
    pub prev_hash: Option<HashDigest>,
    pub parent: Option<ChainId>,
    pub tip_height: Option<u32>,
    pub tip_hash: Option<HashDigest>,
    pub path: PathBuf,
    pub last_extended: u64,
}

impl ChainInfo {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn stored(&self) -> u32 {
        self.tip_height.map_or(0, |tip| tip - self.forkpoint + 1)
    }
}

/// Everything a tree guards with its lock.
#[derive(Debug)]
pub(crate) struct TreeState {
    pub(crate) params: Arc<NetworkParameters>,
    pub(crate) dir: PathBuf,
    pub(crate) chains: Vec<Option<HeaderChain>>,
    pub(crate) root: ChainId,
    pub(crate) extend_seq: u64,
}

impl TreeState {
    pub(crate) fn chain(&self, id: ChainId) -> Result<&HeaderChain> {
        self.chains
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ChainError::UnknownChain(id))
    }

    pub(crate) fn chain_mut(&mut self, id: ChainId) -> Result<&mut HeaderChain> {
        self.chains
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ChainError::UnknownChain(id))
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains
            .iter()
            .enumerate()
            .filter(|(_, chain)| chain.is_some())
            .map(|(index, _)| ChainId(index))
    }

    pub(crate) fn insert(&mut self, chain: HeaderChain) -> ChainId {
        self.chains.push(Some(chain));
        ChainId(self.chains.len() - 1)
    }

    pub(crate) fn children(&self, id: ChainId) -> Vec<ChainId> {
        self.ids()
            .filter(|child| {
                self.chain(*child)
                    .is_ok_and(|chain| chain.parent == Some(id))
            })
            .collect()
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.extend_seq += 1;
        self.extend_seq
    }

    /// The chain whose own file stores `height` in `id`'s view.
    pub(crate) fn owner_of(&self, id: ChainId, height: u32) -> Result<ChainId> {
        let mut current = id;
        loop {
            let chain = self.chain(current)?;
            if chain.holds(height) {
                return Ok(current);
            }
            match chain.parent {
                Some(parent) if height < chain.forkpoint => current = parent,
                _ => return Err(ChainError::HeightOutOfRange { chain: id, height }),
            }
        }
    }

    pub(crate) fn read_record(&self, id: ChainId, height: u32) -> Result<Vec<u8>> {
        let owner = self.chain(self.owner_of(id, height)?)?;
        owner.file.read(height - owner.forkpoint)
    }

    pub(crate) fn read_header(&self, id: ChainId, height: u32) -> Result<BlockHeader> {
        BlockHeader::read(&self.read_record(id, height)?)
    }

    pub(crate) fn hash_at_height(&self, id: ChainId, height: u32) -> Result<HashDigest> {
        Ok(hash_raw(&self.read_record(id, height)?))
    }

    pub(crate) fn tip_height(&self, id: ChainId) -> Result<Option<u32>> {
        Ok(self.chain(id)?.tip_height())
    }

    pub(crate) fn tip_hash(&self, id: ChainId) -> Result<Option<HashDigest>> {
        match self.tip_height(id)? {
            Some(tip) => self.hash_at_height(id, tip).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn summary(&self, id: ChainId) -> Result<ChainSummary> {
        Ok(ChainSummary {
            tip_height: self.tip_height(id)?,
            tip_hash: self.tip_hash(id)?,
            last_extended: self.chain(id)?.last_extended,
        })
    }

    pub(crate) fn info(&self, id: ChainId) -> Result<ChainInfo> {
        let chain = self.chain(id)?;
        Ok(ChainInfo {
            id,
            forkpoint: chain.forkpoint,
            forkpoint_hash: chain.forkpoint_hash,
            prev_hash: chain.prev_hash,
            parent: chain.parent,
            tip_height: chain.tip_height(),
            tip_hash: self.tip_hash(id)?,
            path: chain.file.path().to_path_buf(),
            last_extended: chain.last_extended,
        })
    }

    /// Maps `id` to its tip and every ancestor to the highest height `id` sees through it.
    pub(crate) fn parent_heights(&self, id: ChainId) -> Result<BTreeMap<ChainId, u32>> {
        let mut heights = BTreeMap::new();
        let chain = self.chain(id)?;
        let Some(tip) = chain.tip_height() else {
            return Ok(heights);
        };
        heights.insert(id, tip);

        let mut child = chain;
        while let Some(parent_id) = child.parent {
            let parent = self.chain(parent_id)?;
            let below_child = child.forkpoint.saturating_sub(1);
            let seen = parent.tip_height().map_or(below_child, |t| t.min(below_child));
            heights.insert(parent_id, seen);
            child = parent;
        }
        Ok(heights)
    }

    /// Highest height at which `a` and `b` hold the same header.
    pub(crate) fn last_common_height(&self, a: ChainId, b: ChainId) -> Result<u32> {
        let ours = self.parent_heights(a)?;
        let theirs = self.parent_heights(b)?;
        let mut candidates: Vec<u32> = ours
            .iter()
            .filter_map(|(id, h)| theirs.get(id).map(|other| (*h).min(*other)))
            .collect();
        candidates.sort_unstable_by(|x, y| y.cmp(x));

        for height in candidates {
            if self.hash_at_height(a, height)? == self.hash_at_height(b, height)? {
                return Ok(height);
            }
        }
        Err(ChainError::NoCommonAncestor(a, b))
    }

    /// Timestamps and bits of the headers the retarget rule needs for `height`.
    pub(crate) fn bits_window(&self, view: ChainId, height: u32) -> Result<Vec<BitsSample>> {
        let start = height.saturating_sub(self.params.retarget.window());
        (start..height)
            .map(|h| {
                let header = self.read_header(view, h)?;
                Ok(BitsSample {
                    time: header.time,
                    bits: header.bits,
                })
            })
            .collect()
    }

    /// Validates `header` as the header at `height` on top of `view`.
    pub(crate) fn validate_at(
        &self,
        view: ChainId,
        height: u32,
        header: &BlockHeader,
        check_pow: bool,
    ) -> Result<HashDigest> {
        let hash = header.hash();
        if height == 0 {
            if hash != self.params.genesis {
                return Err(ChainError::Disconnected { height, hash });
            }
            return Ok(hash);
        }

        if header.prev_block != self.hash_at_height(view, height - 1)? {
            return Err(ChainError::Disconnected { height, hash });
        }

        let checkpoints = &self.params.checkpoints;
        if checkpoints.covers(height) {
            if let Some(expected) = checkpoints.expected_hash(height)
                && expected != hash
            {
                return Err(ChainError::CheckpointMismatch { height, hash });
            }
            return Ok(hash);
        }

        if check_pow && self.params.requires_work(height) {
            let prior = self.bits_window(view, height)?;
            verify_pow(
                &hash,
                header.bits,
                height,
                &prior,
                self.params.retarget.as_ref(),
                &self.params.pow_limit_target(),
            )
            .map_err(|source| ChainError::InvalidProofOfWork { height, source })?;
        }
        Ok(hash)
    }

    /// Checks that `header` extends chain `id` at its tip.
    pub(crate) fn check_connect(
        &self,
        id: ChainId,
        header: &BlockHeader,
        check_pow: bool,
    ) -> Result<HashDigest> {
        let height = match self.tip_height(id)? {
            Some(tip) => tip + 1,
            None => 0,
        };
        self.validate_at(id, height, header, check_pow)
    }

    /// Appends `header` at the tip of `id`. Fork files are renamed to their new tip.
    pub(crate) fn append(&mut self, id: ChainId, header: &BlockHeader) -> Result<u32> {
        let hash = self.check_connect(id, header, true)?;
        let height = self.tip_height(id)?.map_or(0, |tip| tip + 1);

        let dir = self.dir.clone();
        let seq = self.next_seq();
        let chain = self.chain_mut(id)?;
        let before = chain.file.len();
        chain.file.append(&header.to_bytes())?;

        if let Some(prev_hash) = chain.prev_hash {
            let renamed = store::fork_path(
                &dir,
                &ForkName {
                    forkpoint: chain.forkpoint,
                    prev_hash,
                    tip_hash: hash,
                },
            );
            if let Err(e) = chain.file.rename(&renamed) {
                if let Err(undo) = chain.file.truncate(before) {
                    error!("chain {id}: could not drop header {hash} after failed rename: {undo}");
                }
                return Err(e);
            }
        }
        chain.last_extended = seq;
        debug!("chain {id}: stored {hash} at height {height}");
        Ok(height)
    }

    /// Height at which `header` would start a fork of `view`, found by
    /// scanning down from below the tip for its parent.
    pub(crate) fn locate_fork(&self, view: ChainId, header: &BlockHeader) -> Result<u32> {
        let hash = header.hash();
        let tip = self.tip_height(view)?.unwrap_or(0);
        for k in (0..tip).rev() {
            if self.hash_at_height(view, k)? != header.prev_block {
                continue;
            }
            if self.params.checkpoints.covers(k + 1) {
                return Err(ChainError::CheckpointMismatch { height: k + 1, hash });
            }
            return Ok(k + 1);
        }
        Err(ChainError::Disconnected { height: tip, hash })
    }

    /// Starts a new chain holding `header` at `height`, branching off `view` at `height - 1`.
    ///
    /// A header already present at `height` in `view` creates nothing and
    /// returns the chain that stores it.
    pub(crate) fn fork_at(
        &mut self,
        view: ChainId,
        height: u32,
        header: &BlockHeader,
    ) -> Result<ChainId> {
        let hash = header.hash();
        let tip = self.tip_height(view)?;
        if height == 0 || tip.is_none_or(|tip| height > tip) {
            return Err(ChainError::HeightOutOfRange {
                chain: view,
                height,
            });
        }
        if self.params.checkpoints.covers(height) {
            return Err(ChainError::CheckpointMismatch { height, hash });
        }
        if self.hash_at_height(view, height)? == hash {
            return self.owner_of(view, height);
        }
        self.validate_at(view, height, header, true)?;
        let parent = self.owner_of(view, height - 1)?;

        let forks = store::forks_dir(&self.dir);
        fs::create_dir_all(&forks).map_err(|e| ChainError::storage(&forks, e))?;
        let path = store::fork_path(
            &self.dir,
            &ForkName {
                forkpoint: height,
                prev_hash: header.prev_block,
                tip_hash: hash,
            },
        );
        let mut file = FlatFile::create(&path, self.params.record_size)?;
        if let Err(e) = file.append(&header.to_bytes()) {
            if let Err(cleanup) = file.remove() {
                error!("could not remove half-created fork file: {cleanup}");
            }
            return Err(e);
        }

        let last_extended = self.next_seq();
        let id = self.insert(HeaderChain {
            file,
            forkpoint: height,
            forkpoint_hash: hash,
            prev_hash: Some(header.prev_block),
            parent: Some(parent),
            last_extended,
        });
        info!("chain {id}: forked off {parent} at height {height} with {hash}");
        Ok(id)
    }

    /// Best chain of the tree under the network comparator.
    pub(crate) fn best_chain(&self) -> Result<ChainId> {
        let mut best = self.root;
        let mut best_summary = self.summary(best)?;
        for id in self.ids().collect::<Vec<_>>() {
            let summary = self.summary(id)?;
            if self.params.comparator.is_better(&summary, &best_summary) {
                best = id;
                best_summary = summary;
            }
        }
        Ok(best)
    }
}
