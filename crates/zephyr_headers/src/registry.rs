//! Process-wide table of chain trees, keyed by genesis hash.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use zephyr_crypto::HashDigest;

use crate::chain::ChainId;
use crate::error::{ChainError, Result};
use crate::params::NetworkParameters;
use crate::tree::ChainTree;

#[derive(Debug, Default)]
pub struct Registry {
    trees: RwLock<HashMap<HashDigest, Arc<ChainTree>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Returns the tree for `params.genesis`, loading it from `dir` on first use.
    ///
    /// A tree already open for that genesis is returned as is, whatever `dir` says.
    pub fn open_tree(&self, params: NetworkParameters, dir: impl AsRef<Path>) -> Result<Arc<ChainTree>> {
        let mut trees = self.trees.write();
        if let Some(tree) = trees.get(&params.genesis) {
            return Ok(Arc::clone(tree));
        }
        let genesis = params.genesis;
        let tree = Arc::new(ChainTree::open(params, dir)?);
        trees.insert(genesis, Arc::clone(&tree));
        Ok(tree)
    }

    pub fn tree(&self, genesis: &HashDigest) -> Option<Arc<ChainTree>> {
        self.trees.read().get(genesis).cloned()
    }

    /// Canonical chain of the tree for `genesis`.
    pub fn root_of(&self, genesis: &HashDigest) -> Option<ChainId> {
        self.tree(genesis).map(|tree| tree.root())
    }

    /// Highest height shared by two chains, possibly of different trees.
    pub fn last_common_height(
        &self,
        a: (&HashDigest, ChainId),
        b: (&HashDigest, ChainId),
    ) -> Result<u32> {
        if a.0 != b.0 {
            return Err(ChainError::NoCommonAncestor(a.1, b.1));
        }
        let tree = self.tree(a.0).ok_or(ChainError::UnknownChain(a.1))?;
        tree.last_common_height(a.1, b.1)
    }

    /// Flushes and forgets the tree for `genesis`. Returns whether one was open.
    pub fn close_tree(&self, genesis: &HashDigest) -> Result<bool> {
        let Some(tree) = self.trees.write().remove(genesis) else {
            return Ok(false);
        };
        tree.sync()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }

    /// Flushes and drops every tree. The first storage error is returned after
    /// all trees have been attempted.
    pub fn shutdown(&self) -> Result<()> {
        let trees: Vec<_> = self.trees.write().drain().collect();
        let mut first_error = None;
        for (genesis, tree) in trees {
            if let Err(e) = tree.sync() {
                first_error.get_or_insert(e);
            }
            info!("closed tree {genesis}");
        }
        first_error.map_or(Ok(()), Err)
    }
}
