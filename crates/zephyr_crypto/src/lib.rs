//! Minimal proof-of-work verification for Zephyr block headers.
//!
//! This crate exposes:
//! - Content hashing: `sha256d`, `HashDigest`
//! - 256-bit targets and compact `nBits`: `Target`
//! - Difficulty filter: `verify_difficulty_filter`, `meets_target`
//! - Retarget rules: `Retarget`, `FixedBits`, `AveragingWindow`
//! - Combined helper: `verify_pow`
pub mod difficulty;
pub mod hash;

pub use difficulty::filter::{DiffError, meets_target, verify_difficulty_filter};
pub use difficulty::retarget::{AveragingWindow, BitsSample, FixedBits, Retarget, verify_retarget};
pub use difficulty::target::Target;
pub use hash::{HashDigest, HashParseError, sha256d};

/// Verifies the difficulty filter and the retarget rule for a header.
///
/// `prior` holds the samples of the headers preceding `height`, oldest first;
/// the caller supplies at most `rule.window()` of them.
pub fn verify_pow(
    header_hash: &HashDigest,
    n_bits: u32,
    height: u32,
    prior: &[BitsSample],
    rule: &dyn Retarget,
    pow_limit: &Target,
) -> Result<(), DiffError> {
    verify_difficulty_filter(header_hash, n_bits, pow_limit)?;
    verify_retarget(rule, height, prior, n_bits)
}
