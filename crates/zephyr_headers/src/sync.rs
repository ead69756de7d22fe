//! Header import driver.
//!
//! Headers arrive one at a time from a [`HeaderSource`] together with the
//! height the source claims for them. Each one is routed:
//!
//! 1. Already stored at that height on some chain: skipped.
//! 2. Its parent is the tip of some chain: appended there, which may swap
//!    that chain in as canonical.
//! 3. Its parent sits below the tip of some chain: a new fork is started.
//! 4. Otherwise it is rejected as disconnected.
//!
//! Validation failures are collected per header so the caller can penalize
//! the source; storage failures stop the import.
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::ChainId;
use crate::error::{ChainError, Result};
use crate::header::BlockHeader;
use crate::tree::ChainTree;

/// Supplier of candidate headers with their claimed heights.
pub trait HeaderSource {
    fn next_header(&mut self) -> Option<Result<(u32, BlockHeader)>>;
}

/// One line of an import file.
#[derive(Serialize, Deserialize)]
struct Record {
    height: u32,
    header_hex: String,
}

/// Reads `{"height": .., "header_hex": ..}` lines. Blank lines are skipped.
pub struct JsonlSource<R> {
    lines: io::Lines<R>,
    origin: PathBuf,
    line: usize,
}

impl JsonlSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ChainError::storage(path, e))?;
        Ok(JsonlSource {
            lines: BufReader::new(file).lines(),
            origin: path.to_path_buf(),
            line: 0,
        })
    }
}

impl<R: BufRead> JsonlSource<R> {
    pub fn new(reader: R) -> Self {
        JsonlSource {
            lines: reader.lines(),
            origin: PathBuf::from("<reader>"),
            line: 0,
        }
    }
}

impl<R: BufRead> HeaderSource for JsonlSource<R> {
    fn next_header(&mut self) -> Option<Result<(u32, BlockHeader)>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(ChainError::storage(&self.origin, e))),
            };
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Record>(&line)
                .map_err(|e| ChainError::MalformedHeader(format!("line {}: {e}", self.line)))
                .and_then(|rec| Ok((rec.height, BlockHeader::from_hex(&rec.header_hex)?)));
            return Some(parsed);
        }
    }
}

/// Writes headers in the format [`JsonlSource`] reads.
pub fn to_jsonl_line(height: u32, header: &BlockHeader) -> Result<String> {
    serde_json::to_string(&Record {
        height,
        header_hex: header.to_hex(),
    })
    .map_err(|e| ChainError::Config(format!("encode record: {e}")))
}

/// In-memory source, mostly for tests and replays.
#[derive(Debug, Default)]
pub struct MemorySource {
    headers: VecDeque<(u32, BlockHeader)>,
}

impl From<Vec<(u32, BlockHeader)>> for MemorySource {
    fn from(headers: Vec<(u32, BlockHeader)>) -> Self {
        MemorySource {
            headers: headers.into(),
        }
    }
}

impl HeaderSource for MemorySource {
    fn next_header(&mut self) -> Option<Result<(u32, BlockHeader)>> {
        self.headers.pop_front().map(Ok)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Appended at the tip of the chain.
    Extended(ChainId),
    /// Started the new chain.
    Forked(ChainId),
    /// Already stored; the chain holding it.
    AlreadyKnown(ChainId),
}

#[derive(Debug)]
pub struct Rejection {
    /// `None` when the source could not even produce a height.
    pub height: Option<u32>,
    pub error: ChainError,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub extended: usize,
    pub forked: usize,
    pub known: usize,
    pub rejected: Vec<Rejection>,
    /// Swaps triggered during the import.
    pub swaps: u64,
}

/// Routes one header into `tree`.
pub fn import_header(tree: &ChainTree, height: u32, header: &BlockHeader) -> Result<ImportOutcome> {
    let hash = header.hash();
    if let Some(chain) = tree.find_header(height, &hash) {
        return Ok(ImportOutcome::AlreadyKnown(chain));
    }

    let Some(below) = height.checked_sub(1) else {
        let root = tree.root();
        tree.save_header(root, header)?;
        return Ok(ImportOutcome::Extended(root));
    };

    for chain in tree.chains() {
        if tree.tip_height(chain)? == Some(below) && tree.tip_hash(chain)? == Some(header.prev_block) {
            tree.save_header(chain, header)?;
            return Ok(ImportOutcome::Extended(chain));
        }
    }

    match tree.find_header(below, &header.prev_block) {
        Some(view) => tree.fork_at(view, height, header).map(ImportOutcome::Forked),
        None => Err(ChainError::Disconnected { height, hash }),
    }
}

/// Drains `source` into `tree`.
pub fn import_all<S: HeaderSource>(tree: &ChainTree, source: &mut S) -> Result<ImportReport> {
    let start_generation = tree.generation();
    let mut report = ImportReport::default();

    while let Some(next) = source.next_header() {
        let (height, header) = match next {
            Ok(next) => next,
            Err(e @ ChainError::Storage { .. }) => return Err(e),
            Err(e) => {
                warn!("skipping unreadable header: {e}");
                report.rejected.push(Rejection {
                    height: None,
                    error: e,
                });
                continue;
            }
        };

        match import_header(tree, height, &header) {
            Ok(ImportOutcome::Extended(chain)) => {
                debug!("✓ Block {height} stored on chain {chain}");
                report.extended += 1;
            }
            Ok(ImportOutcome::Forked(chain)) => {
                info!("Block {height} starts fork {chain}");
                report.forked += 1;
            }
            Ok(ImportOutcome::AlreadyKnown(_)) => report.known += 1,
            Err(e @ ChainError::Storage { .. }) => return Err(e),
            Err(e) => {
                warn!("rejected block {height}: {e}");
                report.rejected.push(Rejection {
                    height: Some(height),
                    error: e,
                });
            }
        }
    }

    report.swaps = tree.generation() - start_generation;
    info!(
        "import done: {} extended, {} forked, {} known, {} rejected, {} swaps",
        report.extended,
        report.forked,
        report.known,
        report.rejected.len(),
        report.swaps
    );
    Ok(report)
}
