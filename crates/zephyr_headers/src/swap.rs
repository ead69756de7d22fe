//! Promotion of a fork to canonical status.
//!
//! Promoting `X` whose ancestor path is `X = c0, c1, ..., cn = R` (the root):
//!
//! 1. The canonical file keeps `R`'s records below `c(n-1)`'s forkpoint and
//!    receives, in height order, the part of every `ci` (`0 < i < n`) below
//!    `c(i-1)`'s forkpoint, then all of `X`.
//! 2. Every `ci` (`i >= 1`) is demoted to a fork of `X` holding only its
//!    records from `c(i-1)`'s old forkpoint up to its tip. A `ci` left with no
//!    records is dropped.
//! 3. Chains that hung off the path are re-attached to whichever rearranged
//!    chain now stores the header below their forkpoint.
//!
//! Files move first: demoted segments are staged next to their final names
//! and renamed into place, and only then is the canonical file rewritten.
//! Every header therefore stays on disk under a loadable name at each step:
//! before the rewrite the new segments duplicate the canonical tail and are
//! dropped on reload, after it they hold the only copy of the demoted branch.
//! Metadata is only touched once all of that has succeeded; a failure before
//! then rolls the files back and leaves the tree as it was.
use std::collections::HashSet;
use std::fs;
use std::mem;
use std::path::PathBuf;

use tracing::{error, info, warn};
use zephyr_crypto::HashDigest;

use crate::chain::{ChainId, TreeState};
use crate::error::{ChainError, Result};
use crate::header::hash_raw;
use crate::store::{self, FlatFile, ForkName};

/// New identity of a path chain that survives the swap as a fork.
struct Demotion {
    /// Position on the path, `1..=n`.
    position: usize,
    forkpoint: u32,
    forkpoint_hash: HashDigest,
    prev_hash: HashDigest,
    bytes: Vec<u8>,
    path: PathBuf,
}

impl TreeState {
    /// Swaps `id` in as the root when the comparator prefers it. Returns
    /// whether a swap happened.
    pub(crate) fn reevaluate(&mut self, id: ChainId) -> Result<bool> {
        let candidate = self.summary(id)?;
        if id == self.root {
            return Ok(false);
        }
        let current = self.summary(self.root)?;
        if !self.params.comparator.is_better(&candidate, &current) {
            return Ok(false);
        }
        self.promote(id)?;
        Ok(true)
    }

    pub(crate) fn promote(&mut self, id: ChainId) -> Result<()> {
        let root = self.root;
        let mut path = vec![id];
        let mut chain = self.chain(id)?;
        while let Some(parent) = chain.parent {
            path.push(parent);
            chain = self.chain(parent)?;
        }
        if path.last() != Some(&root) {
            return Err(ChainError::NoCommonAncestor(id, root));
        }
        let n = path.len() - 1;
        if n == 0 {
            return Ok(());
        }

        let old_forkpoints = path
            .iter()
            .map(|c| self.chain(*c).map(|chain| chain.forkpoint))
            .collect::<Result<Vec<u32>>>()?;
        let keep = old_forkpoints[n - 1];
        let junction = self.last_common_height(id, root)?;
        if junction + 1 != keep {
            return Err(ChainError::NoCommonAncestor(id, root));
        }

        let mut promoted = Vec::new();
        for i in (1..n).rev() {
            let chain = self.chain(path[i])?;
            promoted.extend(
                chain
                    .file
                    .read_range(0, old_forkpoints[i - 1] - old_forkpoints[i])?,
            );
        }
        promoted.extend(self.chain(id)?.file.read_all()?);

        let record_size = self.params.record_size;
        let mut demotions = Vec::new();
        let mut emptied = Vec::new();
        for position in 1..=n {
            let chain = self.chain(path[position])?;
            let from = old_forkpoints[position - 1];
            let skip = from - chain.forkpoint;
            let count = chain.file.len().saturating_sub(skip);
            if count == 0 {
                emptied.push(position);
                continue;
            }
            let bytes = chain.file.read_range(skip, count)?;
            let forkpoint_hash = hash_raw(&bytes[..record_size]);
            let tip_hash = hash_raw(&bytes[bytes.len() - record_size..]);
            let prev_hash = self.hash_at_height(path[position], from - 1)?;
            let file_path = store::fork_path(
                &self.dir,
                &ForkName {
                    forkpoint: from,
                    prev_hash,
                    tip_hash,
                },
            );
            demotions.push(Demotion {
                position,
                forkpoint: from,
                forkpoint_hash,
                prev_hash,
                bytes,
                path: file_path,
            });
        }

        let root_tail = {
            let file = &self.chain(root)?.file;
            file.read_range(keep, file.len() - keep)?
        };

        let mut staged = self.stage(&demotions)?;
        let failed = staged
            .iter_mut()
            .zip(&demotions)
            .find_map(|(file, demotion)| file.rename(&demotion.path).err());
        if let Some(e) = failed {
            discard(staged);
            return Err(e);
        }

        let rewrite = {
            let canonical = &mut self.chain_mut(root)?.file;
            canonical
                .truncate(keep)
                .and_then(|()| canonical.append(&promoted))
        };
        if let Err(e) = rewrite {
            self.restore_canonical(keep, &root_tail);
            discard(staged);
            return Err(e);
        }

        // Files are in place; from here on only metadata changes.
        let demoted = demotions.len();
        let mut canonical = None;
        for (demotion, file) in demotions.into_iter().zip(staged) {
            let chain = self.chain_mut(path[demotion.position])?;
            let old = mem::replace(&mut chain.file, file);
            chain.forkpoint = demotion.forkpoint;
            chain.forkpoint_hash = demotion.forkpoint_hash;
            chain.prev_hash = Some(demotion.prev_hash);
            chain.parent = Some(id);
            if demotion.position == n {
                canonical = Some(old);
            } else {
                retire(old);
            }
        }
        for position in &emptied {
            if let Some(chain) = self.chains[path[*position].0].take() {
                if *position == n {
                    canonical = Some(chain.file);
                } else {
                    retire(chain.file);
                }
            }
        }
        let canonical = canonical.ok_or(ChainError::UnknownChain(root))?;

        let genesis = self.params.genesis;
        let promoted_chain = self.chain_mut(id)?;
        let old = mem::replace(&mut promoted_chain.file, canonical);
        promoted_chain.forkpoint = 0;
        promoted_chain.forkpoint_hash = genesis;
        promoted_chain.prev_hash = None;
        promoted_chain.parent = None;
        retire(old);
        self.root = id;

        self.relink(&path)?;

        info!(
            "chain {id} is canonical at height {}, junction {junction}, {demoted} demoted, {} dropped",
            self.chain(id)?.tip_height().unwrap_or(0),
            emptied.len()
        );
        Ok(())
    }

    /// Re-attaches chains whose parent was on the promoted path.
    fn relink(&mut self, path: &[ChainId]) -> Result<()> {
        let promoted = path[0];
        let on_path: HashSet<ChainId> = path.iter().copied().collect();
        let strays: Vec<ChainId> = self
            .ids()
            .filter(|other| !on_path.contains(other))
            .filter(|other| {
                self.chain(*other)
                    .is_ok_and(|c| c.parent.is_some_and(|p| on_path.contains(&p)))
            })
            .collect();

        for stray in strays {
            let (below, prev_hash) = {
                let chain = self.chain(stray)?;
                (chain.forkpoint.saturating_sub(1), chain.prev_hash)
            };
            let parent = path[1..]
                .iter()
                .copied()
                .filter(|c| self.chain(*c).is_ok_and(|chain| chain.holds(below)))
                .find(|c| self.hash_at_height(*c, below).ok() == prev_hash)
                .unwrap_or(promoted);
            self.chain_mut(stray)?.parent = Some(parent);
        }
        Ok(())
    }

    /// Writes every demoted segment to its staging file.
    fn stage(&self, demotions: &[Demotion]) -> Result<Vec<FlatFile>> {
        if !demotions.is_empty() {
            let forks = store::forks_dir(&self.dir);
            fs::create_dir_all(&forks).map_err(|e| ChainError::storage(&forks, e))?;
        }
        let mut staged = Vec::with_capacity(demotions.len());
        for demotion in demotions {
            let path = store::staging_path(&demotion.path);
            let written = FlatFile::create(&path, self.params.record_size).and_then(|mut file| {
                match file.append(&demotion.bytes) {
                    Ok(()) => Ok(file),
                    Err(e) => {
                        staged.push(file);
                        Err(e)
                    }
                }
            });
            match written {
                Ok(file) => staged.push(file),
                Err(e) => {
                    discard(staged);
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    fn restore_canonical(&mut self, keep: u32, tail: &[u8]) {
        let root = self.root;
        let restored = self.chain_mut(root).and_then(|chain| {
            let canonical = &mut chain.file;
            canonical.truncate(keep).and_then(|()| canonical.append(tail))
        });
        if let Err(e) = restored {
            error!("could not restore the canonical file after a failed swap: {e}");
        }
    }
}

/// Removes segments written for a swap that did not go through, wherever
/// they currently live.
fn discard(files: Vec<FlatFile>) {
    for file in files {
        let path = file.path().to_path_buf();
        if let Err(e) = file.remove() {
            warn!("could not remove demoted segment {}: {e}", path.display());
        }
    }
}

/// Deletes a segment file that no chain refers to any more.
fn retire(file: FlatFile) {
    let path = file.path().to_path_buf();
    if let Err(e) = file.remove() {
        warn!("could not remove stale segment {}: {e}", path.display());
    }
}
