//! Fixed-size header record codec.
//!
//! A record is 112 bytes, integers little-endian:
//!
//! | offset | size | field                    |
//! |--------|------|--------------------------|
//! | 0      | 4    | version (i32)            |
//! | 4      | 32   | previous header hash     |
//! | 36     | 32   | merkle root              |
//! | 68     | 4    | time                     |
//! | 72     | 4    | bits (compact target)    |
//! | 76     | 4    | nonce                    |
//! | 80     | 32   | accumulator checkpoint   |
//!
//! The accumulator checkpoint only exists from header version 4 on; older
//! headers carry it zero-filled.
use zephyr_crypto::{HashDigest, sha256d};

use crate::error::{ChainError, Result};

pub const HEADER_SIZE: usize = 112;

/// First header version committing to an accumulator checkpoint.
pub const ACCUMULATOR_VERSION: i32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: HashDigest,
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub accumulator_checkpoint: [u8; 32],
}

impl BlockHeader {
    /// Decodes one record. The buffer must be exactly [`HEADER_SIZE`] bytes.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(ChainError::MalformedHeader(format!(
                "expected {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let header = BlockHeader {
            version: i32::from_le_bytes(word(bytes, 0)),
            prev_block: HashDigest(digest(bytes, 4)),
            merkle_root: digest(bytes, 36),
            time: u32::from_le_bytes(word(bytes, 68)),
            bits: u32::from_le_bytes(word(bytes, 72)),
            nonce: u32::from_le_bytes(word(bytes, 76)),
            accumulator_checkpoint: digest(bytes, 80),
        };

        if header.version < ACCUMULATOR_VERSION
            && header.accumulator_checkpoint.iter().any(|b| *b != 0)
        {
            return Err(ChainError::MalformedHeader(format!(
                "version {} header carries an accumulator checkpoint",
                header.version
            )));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block.0);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out[80..112].copy_from_slice(&self.accumulator_checkpoint);
        out
    }

    pub fn hash(&self) -> HashDigest {
        sha256d(&self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ChainError::MalformedHeader(format!("hex decode: {e}")))?;
        BlockHeader::read(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Hashes a stored record without decoding it.
pub fn hash_raw(record: &[u8]) -> HashDigest {
    sha256d(record)
}

fn word(bytes: &[u8], at: usize) -> [u8; 4] {
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

fn digest(bytes: &[u8], at: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes[at..at + 32]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // Genesis record of the Zephyr network.
    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000009bc36d2ba74b96d57bf98bebdf25d1dc2977ae7773273a1014e98bf2e2f62e1bbb2eac56f0ff0f1edfa624000000000000000000000000000000000000000000000000000000000000000000";

    // Height 1, previous hash = genesis.
    const SECOND_HEX: &str = "0300000018f80e68784ac79737df761bc38e0b5c407384b4ef8ed991969b2b481e0400005fcfd6b2153c917370c077393ab776fdc10f204a411adbc06891a4b3dcd18be09f37ac56ffff0f1e4d0000000000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn decodes_fields() {
        let header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        assert_eq!(header.version, 1);
        assert!(header.prev_block.is_zero());
        assert_eq!(header.time, 0x56ac_2ebb);
        assert_eq!(header.bits, 0x1e0f_fff0);
        assert_eq!(header.nonce, 0x0024_a6df);

        let second = BlockHeader::from_hex(SECOND_HEX).unwrap();
        assert_eq!(
            second.prev_block.to_hex(),
            "0000041e482b9b9691d98eefb48473405c0b8ec31b76df3797c74a78680ef818"
        );
        assert_eq!(second.bits, 0x1e0f_ffff);
    }

    #[test]
    fn serialization_is_exact_inverse() {
        let header = BlockHeader::from_hex(SECOND_HEX).unwrap();
        assert_eq!(header.to_hex(), SECOND_HEX);
        assert_eq!(hash_raw(&header.to_bytes()), header.hash());
    }

    #[test]
    fn rejects_wrong_length() {
        let bytes = hex::decode(GENESIS_HEX).unwrap();
        assert!(matches!(
            BlockHeader::read(&bytes[..80]),
            Err(ChainError::MalformedHeader(_))
        ));
        let mut long = bytes.clone();
        long.push(0);
        assert!(matches!(
            BlockHeader::read(&long),
            Err(ChainError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_accumulator_before_activation() {
        let mut bytes = hex::decode(SECOND_HEX).unwrap();
        bytes[100] = 1;
        assert!(matches!(
            BlockHeader::read(&bytes),
            Err(ChainError::MalformedHeader(_))
        ));

        bytes[0] = ACCUMULATOR_VERSION as u8;
        let header = BlockHeader::read(&bytes).unwrap();
        assert_eq!(header.accumulator_checkpoint[20], 1);
    }
}
