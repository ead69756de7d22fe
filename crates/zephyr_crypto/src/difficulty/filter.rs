use thiserror::Error;

use crate::difficulty::target::Target;
use crate::hash::HashDigest;

/// Errors that can occur during difficulty verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// `nBits` decodes to zero (invalid compact encoding).
    #[error("nBits {0:#010x} encodes an invalid target")]
    InvalidTarget(u32),
    /// Target derived from `nBits` is above the network's PoW limit.
    #[error("target from nBits {0:#010x} exceeds the PoW limit")]
    TargetAbovePowLimit(u32),
    /// SHA256d(header) is greater than the target.
    #[error("block hash {0} is above target")]
    HashAboveTarget(HashDigest),
    /// `nBits` does not match the retarget rule.
    #[error("nBits {found:#x} does not match expected difficulty {expected:#x}")]
    BitsMismatch { expected: u32, found: u32 },
}

/// Verifies the difficulty filter `Hash(header) <= ToTarget(nBits)`.
///
/// `pow_limit` is the easiest target the network accepts; a header claiming an
/// easier one is rejected even if its hash happens to satisfy it.
pub fn verify_difficulty_filter(
    header_hash: &HashDigest,
    n_bits: u32,
    pow_limit: &Target,
) -> Result<(), DiffError> {
    let target = Target::from_compact(n_bits);
    if target.is_zero() {
        return Err(DiffError::InvalidTarget(n_bits));
    }
    if target > *pow_limit {
        return Err(DiffError::TargetAbovePowLimit(n_bits));
    }
    if header_hash.as_target() > target {
        return Err(DiffError::HashAboveTarget(*header_hash));
    }
    Ok(())
}

/// Boolean form of [`verify_difficulty_filter`].
pub fn meets_target(header_hash: &HashDigest, n_bits: u32, pow_limit: &Target) -> bool {
    verify_difficulty_filter(header_hash, n_bits, pow_limit).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGTEST_BITS: u32 = 0x207f_ffff;

    fn hash_with_top_byte(top: u8) -> HashDigest {
        let mut bytes = [0u8; 32];
        bytes[31] = top;
        HashDigest(bytes)
    }

    #[test]
    fn accepts_hash_at_or_below_target() {
        let limit = Target::from_compact(REGTEST_BITS);
        assert!(meets_target(&hash_with_top_byte(0x7f), REGTEST_BITS, &limit));
        assert!(meets_target(&HashDigest::ZERO, REGTEST_BITS, &limit));
    }

    #[test]
    fn rejects_hash_above_target() {
        let limit = Target::from_compact(REGTEST_BITS);
        let hash = hash_with_top_byte(0x80);
        assert_eq!(
            verify_difficulty_filter(&hash, REGTEST_BITS, &limit),
            Err(DiffError::HashAboveTarget(hash))
        );
    }

    #[test]
    fn rejects_targets_easier_than_limit() {
        let limit = Target::from_compact(0x1e0f_ffff);
        assert_eq!(
            verify_difficulty_filter(&HashDigest::ZERO, REGTEST_BITS, &limit),
            Err(DiffError::TargetAbovePowLimit(REGTEST_BITS))
        );
        assert_eq!(
            verify_difficulty_filter(&HashDigest::ZERO, 0, &limit),
            Err(DiffError::InvalidTarget(0))
        );
    }
}
