//! On-disk layout of a chain tree.
//!
//! ```text
//! <dir>/blockchain_headers                       canonical chain, heights [0, tip]
//! <dir>/forks/fork2_<fp>_<prev hash>_<tip hash>  one file per fork segment
//! ```
//!
//! `prev hash` is the header at `fp - 1` that the segment builds on, so sibling
//! forks off the same parent header share a prefix. Hashes in fork names are
//! display hex with leading zeros stripped. Files are
//! bare concatenations of fixed-size records; the record at height `h` of a
//! segment starting at `fp` lives at byte offset `(h - fp) * record_size`.
use std::path::{Path, PathBuf};

use zephyr_crypto::HashDigest;

pub mod flat;

pub use flat::FlatFile;

pub const CANONICAL_FILE: &str = "blockchain_headers";
pub const FORKS_DIR: &str = "forks";

const FORK_PREFIX: &str = "fork2_";
const STAGING_EXTENSION: &str = "tmp";

/// Identity of a fork segment as encoded in its file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForkName {
    pub forkpoint: u32,
    pub prev_hash: HashDigest,
    pub tip_hash: HashDigest,
}

impl ForkName {
    pub fn file_name(&self) -> String {
        format!(
            "{FORK_PREFIX}{}_{}_{}",
            self.forkpoint,
            strip_hash(&self.prev_hash),
            strip_hash(&self.tip_hash)
        )
    }

    /// Inverse of [`ForkName::file_name`]. `None` for anything else found in
    /// the forks directory.
    pub fn parse(name: &str) -> Option<ForkName> {
        let rest = name.strip_prefix(FORK_PREFIX)?;
        let mut parts = rest.split('_');
        let forkpoint = parts.next()?.parse().ok()?;
        let prev_hash = unstrip_hash(parts.next()?)?;
        let tip_hash = unstrip_hash(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(ForkName {
            forkpoint,
            prev_hash,
            tip_hash,
        })
    }
}

pub fn canonical_path(dir: &Path) -> PathBuf {
    dir.join(CANONICAL_FILE)
}

pub fn forks_dir(dir: &Path) -> PathBuf {
    dir.join(FORKS_DIR)
}

pub fn fork_path(dir: &Path, name: &ForkName) -> PathBuf {
    forks_dir(dir).join(name.file_name())
}

/// Where a segment is written before it is renamed to `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".");
    staged.push(STAGING_EXTENSION);
    PathBuf::from(staged)
}

pub fn is_staging_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == STAGING_EXTENSION)
}

fn strip_hash(hash: &HashDigest) -> String {
    hash.to_hex().trim_start_matches('0').to_string()
}

fn unstrip_hash(stripped: &str) -> Option<HashDigest> {
    if stripped.len() > 64 {
        return None;
    }
    HashDigest::from_hex(&format!("{stripped:0>64}")).ok()
}
