//! Header content hashing.
//!
//! Hashes are kept in the byte order produced by SHA-256 ("internal" order) and
//! rendered reversed when displayed, matching node RPC and block explorer output.
use core::fmt;
use core::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::difficulty::target::Target;

/// 32-byte double-SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HashDigest(pub [u8; 32]);

#[derive(Debug, Error, PartialEq)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("hash must be 32 bytes, got {0}")]
    Length(usize),
}

impl HashDigest {
    pub const ZERO: HashDigest = HashDigest([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parses the reversed (display) hex form.
    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let mut bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(HashParseError::Length(bytes.len()));
        }
        bytes.reverse();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(HashDigest(out))
    }

    /// Renders the reversed (display) hex form.
    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }

    /// Interprets the digest as a 256-bit little-endian integer for target comparison.
    pub fn as_target(&self) -> Target {
        Target::from_le_bytes(self.0)
    }
}

impl FromStr for HashDigest {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashDigest::from_hex(s)
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashDigest({})", self.to_hex())
    }
}

/// SHA-256 applied twice.
pub fn sha256d(data: &[u8]) -> HashDigest {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    HashDigest(second.into())
}
