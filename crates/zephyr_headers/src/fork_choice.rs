//! Chain comparison.
//!
//! The swap engine only ever asks one question: is the chain that was just
//! extended better than the current root? The answer is a network parameter.
use core::cmp::Ordering;
use core::fmt;

use zephyr_crypto::HashDigest;

/// What the comparator gets to see of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSummary {
    pub tip_height: Option<u32>,
    pub tip_hash: Option<HashDigest>,
    /// Per-tree sequence number of the chain's latest append.
    pub last_extended: u64,
}

pub trait ChainComparator: fmt::Debug + Send + Sync {
    fn is_better(&self, candidate: &ChainSummary, current: &ChainSummary) -> bool;
}

/// How [`LongestChain`] settles equal tip heights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// The current root stays canonical until a fork is strictly longer.
    #[default]
    KeepCurrent,
    /// The chain extended last wins.
    MostRecentlyExtended,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LongestChain {
    pub tie_break: TieBreak,
}

impl LongestChain {
    pub fn new(tie_break: TieBreak) -> Self {
        LongestChain { tie_break }
    }
}

impl ChainComparator for LongestChain {
    fn is_better(&self, candidate: &ChainSummary, current: &ChainSummary) -> bool {
        match candidate.tip_height.cmp(&current.tip_height) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.tie_break {
                TieBreak::KeepCurrent => false,
                TieBreak::MostRecentlyExtended => candidate.last_extended > current.last_extended,
            },
        }
    }
}
