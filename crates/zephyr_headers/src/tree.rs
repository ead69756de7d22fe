//! A chain tree: every chain sharing one genesis, stored under one directory.
//!
//! Loading a tree from disk:
//!
//! 1. Open (or create) `blockchain_headers`; its first record must be genesis.
//! 2. Drop leftover `.tmp` staging files from an interrupted swap.
//! 3. Parse each fork file name, check its first record's previous hash against
//!    the name and rename it if its tip hash is stale (crash between append and
//!    rename).
//! 4. Link forks in forkpoint order to the chain storing their parent header.
//!    Forks that link nowhere, or only repeat headers already loaded (left by
//!    a swap interrupted before or after the canonical rewrite), are deleted.
//! 5. Promote the best chain if the stored root is not it.
//!
//! All mutation goes through the tree's write lock, so readers never observe
//! a swap in progress. [`ChainTree::generation`] counts swaps.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{info, warn};
use zephyr_crypto::HashDigest;

use crate::chain::{ChainId, ChainInfo, HeaderChain, TreeState};
use crate::error::{ChainError, Result};
use crate::header::{BlockHeader, HEADER_SIZE, hash_raw};
use crate::params::NetworkParameters;
use crate::store::{self, FlatFile, ForkName};

#[derive(Debug)]
pub struct ChainTree {
    params: Arc<NetworkParameters>,
    dir: PathBuf,
    state: RwLock<TreeState>,
    generation: AtomicU64,
}

/// A fork file found on disk, not yet linked.
struct FoundFork {
    file: FlatFile,
    forkpoint: u32,
    forkpoint_hash: HashDigest,
    prev_hash: HashDigest,
}

impl ChainTree {
    /// Loads the tree stored in `dir`, seeding an empty one if nothing is there.
    pub fn open(params: NetworkParameters, dir: impl AsRef<Path>) -> Result<Self> {
        if params.record_size != HEADER_SIZE {
            return Err(ChainError::Config(format!(
                "record size {} does not match the {HEADER_SIZE}-byte header format",
                params.record_size
            )));
        }
        let dir = dir.as_ref().to_path_buf();
        let forks = store::forks_dir(&dir);
        fs::create_dir_all(&forks).map_err(|e| ChainError::storage(&forks, e))?;

        let canonical = FlatFile::open(&store::canonical_path(&dir), params.record_size)?;
        if !canonical.is_empty() {
            let first = hash_raw(&canonical.read(0)?);
            if first != params.genesis {
                return Err(ChainError::Config(format!(
                    "{} starts with {first}, expected genesis {}",
                    canonical.path().display(),
                    params.genesis
                )));
            }
        }

        let params = Arc::new(params);
        let mut state = TreeState {
            params: Arc::clone(&params),
            dir: dir.clone(),
            chains: Vec::new(),
            root: ChainId(0),
            extend_seq: 0,
        };
        state.insert(HeaderChain {
            file: canonical,
            forkpoint: 0,
            forkpoint_hash: params.genesis,
            prev_hash: None,
            parent: None,
            last_extended: 0,
        });

        let mut found = scan_forks(&dir, params.record_size)?;
        found.sort_by_key(|fork| fork.forkpoint);
        let (mut linked, mut dropped) = (0usize, 0usize);
        for fork in found {
            match link_target(&state, &fork) {
                Some(parent) => {
                    let last_extended = state.next_seq();
                    state.insert(HeaderChain {
                        file: fork.file,
                        forkpoint: fork.forkpoint,
                        forkpoint_hash: fork.forkpoint_hash,
                        prev_hash: Some(fork.prev_hash),
                        parent: Some(parent),
                        last_extended,
                    });
                    linked += 1;
                }
                None => {
                    warn!(
                        "deleting orphaned or duplicate fork {} (parent {} at height {})",
                        fork.file.path().display(),
                        fork.prev_hash,
                        fork.forkpoint.saturating_sub(1)
                    );
                    fork.file.remove()?;
                    dropped += 1;
                }
            }
        }

        let tree = ChainTree {
            params,
            dir,
            state: RwLock::new(state),
            generation: AtomicU64::new(0),
        };
        {
            let mut state = tree.state.write();
            let best = state.best_chain()?;
            if best != state.root {
                state.promote(best)?;
                tree.generation.fetch_add(1, Ordering::SeqCst);
            }
            info!(
                "opened {} tree at {}: tip {:?}, {linked} forks, {dropped} dropped",
                tree.params.network,
                tree.dir.display(),
                state.tip_height(state.root)?
            );
        }
        Ok(tree)
    }

    pub fn params(&self) -> &NetworkParameters {
        &self.params
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn genesis(&self) -> HashDigest {
        self.params.genesis
    }

    /// Number of swaps since the tree was opened.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The canonical chain.
    pub fn root(&self) -> ChainId {
        self.state.read().root
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.state.read().ids().collect()
    }

    pub fn info(&self, chain: ChainId) -> Result<ChainInfo> {
        self.state.read().info(chain)
    }

    pub fn tip_height(&self, chain: ChainId) -> Result<Option<u32>> {
        self.state.read().tip_height(chain)
    }

    pub fn tip_hash(&self, chain: ChainId) -> Result<Option<HashDigest>> {
        self.state.read().tip_hash(chain)
    }

    pub fn hash_at_height(&self, chain: ChainId, height: u32) -> Result<HashDigest> {
        self.state.read().hash_at_height(chain, height)
    }

    pub fn read_header(&self, chain: ChainId, height: u32) -> Result<BlockHeader> {
        self.state.read().read_header(chain, height)
    }

    pub fn parent_heights(&self, chain: ChainId) -> Result<BTreeMap<ChainId, u32>> {
        self.state.read().parent_heights(chain)
    }

    pub fn last_common_height(&self, a: ChainId, b: ChainId) -> Result<u32> {
        self.state.read().last_common_height(a, b)
    }

    /// Whether `header` would extend `chain` at its tip.
    pub fn can_connect(&self, chain: ChainId, header: &BlockHeader, check_pow: bool) -> bool {
        self.check_connect(chain, header, check_pow).is_ok()
    }

    /// Like [`ChainTree::can_connect`], with the reason for a refusal.
    pub fn check_connect(&self, chain: ChainId, header: &BlockHeader, check_pow: bool) -> Result<()> {
        self.state
            .read()
            .check_connect(chain, header, check_pow)
            .map(|_| ())
    }

    /// Whether `header` is acceptable at `height` on top of the canonical chain.
    pub fn is_header_valid(&self, height: u32, header: &BlockHeader) -> bool {
        let state = self.state.read();
        state.validate_at(state.root, height, header, true).is_ok()
    }

    /// Appends `header` to `chain` and swaps the chain in if it is now the best.
    ///
    /// Returns the height the header was stored at. If the swap fails the
    /// header stays stored and the storage error is returned.
    pub fn save_header(&self, chain: ChainId, header: &BlockHeader) -> Result<u32> {
        let mut state = self.state.write();
        let height = state.append(chain, header)?;
        self.reevaluate_locked(&mut state, chain)?;
        Ok(height)
    }

    /// Starts a fork of `view` for `header`, locating its parent by hash.
    pub fn fork(&self, view: ChainId, header: &BlockHeader) -> Result<ChainId> {
        let mut state = self.state.write();
        let height = state.locate_fork(view, header)?;
        state.fork_at(view, height, header)
    }

    /// Starts a fork of `view` with `header` at `height`.
    pub fn fork_at(&self, view: ChainId, height: u32, header: &BlockHeader) -> Result<ChainId> {
        self.state.write().fork_at(view, height, header)
    }

    /// Swaps `chain` in as the root if the comparator prefers it.
    pub fn reevaluate(&self, chain: ChainId) -> Result<bool> {
        let mut state = self.state.write();
        self.reevaluate_locked(&mut state, chain)
    }

    /// First chain whose view holds `hash` at `height`, checking the root first.
    pub fn find_header(&self, height: u32, hash: &HashDigest) -> Option<ChainId> {
        let state = self.state.read();
        let root = state.root;
        std::iter::once(root)
            .chain(state.ids().filter(|id| *id != root))
            .find(|id| state.hash_at_height(*id, height).is_ok_and(|h| h == *hash))
    }

    /// Deletes a fork nothing depends on. Returns `false`, leaving the tree
    /// untouched, for the root or a chain with children.
    pub fn prune(&self, chain: ChainId) -> Result<bool> {
        let mut state = self.state.write();
        state.chain(chain)?;
        if chain == state.root || !state.children(chain).is_empty() {
            return Ok(false);
        }
        if let Some(pruned) = state.chains[chain.0].take() {
            info!("pruned chain {chain} at {}", pruned.file.path().display());
            pruned.file.remove()?;
        }
        Ok(true)
    }

    /// Flushes every chain file to disk.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read();
        for id in state.ids() {
            state.chain(id)?.file.sync()?;
        }
        Ok(())
    }

    fn reevaluate_locked(&self, state: &mut TreeState, chain: ChainId) -> Result<bool> {
        let swapped = state.reevaluate(chain)?;
        if swapped {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        Ok(swapped)
    }
}

/// Opens every fork file in `dir`, repairing or deleting what cannot be used.
fn scan_forks(dir: &Path, record_size: usize) -> Result<Vec<FoundFork>> {
    let forks = store::forks_dir(dir);
    let entries = fs::read_dir(&forks).map_err(|e| ChainError::storage(&forks, e))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ChainError::storage(&forks, e))?.path();
        if store::is_staging_file(&path) {
            warn!("removing staged segment {} left by an interrupted swap", path.display());
            fs::remove_file(&path).map_err(|e| ChainError::storage(&path, e))?;
            continue;
        }
        let Some(name) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(ForkName::parse)
        else {
            warn!("ignoring unrecognised file {}", path.display());
            continue;
        };
        if let Some(fork) = load_fork(&path, &name, dir, record_size)? {
            found.push(fork);
        }
    }
    Ok(found)
}

fn load_fork(path: &Path, name: &ForkName, dir: &Path, record_size: usize) -> Result<Option<FoundFork>> {
    let mut file = FlatFile::open(path, record_size)?;
    if file.is_empty() || name.forkpoint == 0 {
        warn!("deleting unusable fork file {}", path.display());
        file.remove()?;
        return Ok(None);
    }
    let first = file.read(0)?;
    let header = match BlockHeader::read(&first) {
        Ok(header) if header.prev_block == name.prev_hash => header,
        _ => {
            warn!("deleting fork {} whose first header does not match its name", path.display());
            file.remove()?;
            return Ok(None);
        }
    };

    let tip_hash = hash_raw(&file.read(file.len() - 1)?);
    if tip_hash != name.tip_hash {
        let renamed = store::fork_path(
            dir,
            &ForkName {
                tip_hash,
                ..*name
            },
        );
        warn!("renaming fork {} to match its tip {tip_hash}", path.display());
        file.rename(&renamed)?;
    }

    Ok(Some(FoundFork {
        file,
        forkpoint: name.forkpoint,
        forkpoint_hash: header.hash(),
        prev_hash: header.prev_block,
    }))
}

/// The loaded chain whose own records hold the fork's parent header.
fn link_target(state: &TreeState, fork: &FoundFork) -> Option<ChainId> {
    let below = fork.forkpoint - 1;
    let parent = state.ids().find(|id| {
        state.chain(*id).is_ok_and(|chain| chain.holds(below))
            && state.hash_at_height(*id, below).is_ok_and(|h| h == fork.prev_hash)
    })?;
    // A fork whose first header is already stored on the parent's line adds nothing.
    let duplicate = state
        .hash_at_height(parent, fork.forkpoint)
        .is_ok_and(|h| h == fork.forkpoint_hash);
    (!duplicate).then_some(parent)
}
