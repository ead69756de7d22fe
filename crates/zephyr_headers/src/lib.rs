//! Header-chain store for a Zephyr light client.
//!
//! Headers are validated against checkpoints and proof of work, persisted as
//! flat files of fixed-size records, and organised into a tree of chains whose
//! best member is kept canonical by swapping forks in as they overtake it.
pub mod chain;
pub mod checkpoints;
pub mod error;
pub mod fork_choice;
pub mod header;
pub mod params;
pub mod registry;
pub mod store;
mod swap;
pub mod sync;
pub mod tree;

pub use chain::{ChainId, ChainInfo};
pub use checkpoints::CheckpointTable;
pub use error::{ChainError, Result};
pub use fork_choice::{ChainComparator, ChainSummary, LongestChain, TieBreak};
pub use header::{BlockHeader, HEADER_SIZE};
pub use params::{Network, NetworkParameters};
pub use registry::Registry;
pub use sync::{HeaderSource, ImportOutcome, ImportReport, JsonlSource, import_all, import_header};
pub use tree::ChainTree;
