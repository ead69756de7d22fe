use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zephyr_crypto::{DiffError, HashDigest};

use crate::chain::ChainId;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Bytes that cannot be a header record. Drop the header and blame its source.
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// The header does not extend the chain it was offered to.
    #[error("header {hash} does not connect at height {height}")]
    Disconnected { height: u32, hash: HashDigest },
    /// The header conflicts with the embedded checkpoint table.
    #[error("header {hash} at height {height} conflicts with the checkpoint table")]
    CheckpointMismatch { height: u32, hash: HashDigest },
    #[error("proof of work rejected at height {height}: {source}")]
    InvalidProofOfWork {
        height: u32,
        #[source]
        source: DiffError,
    },
    #[error("height {height} is out of range for chain {chain}")]
    HeightOutOfRange { chain: ChainId, height: u32 },
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("chains {0} and {1} share no common ancestor")]
    NoCommonAncestor(ChainId, ChainId),
    #[error("unknown chain {0}")]
    UnknownChain(ChainId),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ChainError {
    pub(crate) fn storage(path: &Path, source: io::Error) -> Self {
        ChainError::Storage {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T, E = ChainError> = std::result::Result<T, E>;
