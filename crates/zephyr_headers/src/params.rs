//! Network parameters.
//!
//! Everything that differs between mainnet, testnet and regtest is carried
//! here and handed to a chain tree when it is opened.
use std::fmt;
use std::sync::Arc;

use tracing::warn;
use zephyr_crypto::{AveragingWindow, FixedBits, HashDigest, Retarget, Target};

use crate::checkpoints::CheckpointTable;
use crate::fork_choice::{ChainComparator, LongestChain};
use crate::header::HEADER_SIZE;

/// Ships empty, so mainnet has no trust horizon unless `--checkpoints` or
/// [`NetworkParameters::with_checkpoints`] supplies one.
const MAINNET_CHECKPOINTS: &str = include_str!("../checkpoints/mainnet.json");

/// Display form `0000041e482b9b9691d98eefb48473405c0b8ec31b76df3797c74a78680ef818`.
pub const GENESIS_HASH: HashDigest = HashDigest([
    0x18, 0xf8, 0x0e, 0x68, 0x78, 0x4a, 0xc7, 0x97, 0x37, 0xdf, 0x76, 0x1b, 0xc3, 0x8e, 0x0b,
    0x5c, 0x40, 0x73, 0x84, 0xb4, 0xef, 0x8e, 0xd9, 0x91, 0x96, 0x9b, 0x2b, 0x48, 0x1e, 0x04,
    0x00, 0x00,
]);

const MAINNET_POW_LIMIT: u32 = 0x1e0f_ffff;
const REGTEST_POW_LIMIT: u32 = 0x207f_ffff;
const TARGET_SPACING: i64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        })
    }
}

#[derive(Clone, Debug)]
pub struct NetworkParameters {
    pub network: Network,
    pub genesis: HashDigest,
    pub checkpoints: CheckpointTable,
    pub retarget: Arc<dyn Retarget>,
    /// Easiest acceptable target, compact form.
    pub pow_limit: u32,
    /// Headers from this height on are proof-of-stake and carry no work to check.
    pub pos_start_height: Option<u32>,
    pub record_size: usize,
    pub comparator: Arc<dyn ChainComparator>,
}

impl NetworkParameters {
    pub fn mainnet() -> Self {
        // A broken embedded table degrades to "no checkpoints", like a missing file.
        let checkpoints = CheckpointTable::from_json(MAINNET_CHECKPOINTS).unwrap_or_else(|e| {
            warn!("ignoring embedded mainnet checkpoints: {e}");
            CheckpointTable::empty()
        });
        NetworkParameters {
            network: Network::Mainnet,
            genesis: GENESIS_HASH,
            checkpoints,
            retarget: Arc::new(AveragingWindow::new(
                Target::from_compact(MAINNET_POW_LIMIT),
                TARGET_SPACING,
            )),
            pow_limit: MAINNET_POW_LIMIT,
            pos_start_height: Some(259_201),
            record_size: HEADER_SIZE,
            comparator: Arc::new(LongestChain::default()),
        }
    }

    pub fn testnet() -> Self {
        NetworkParameters {
            network: Network::Testnet,
            checkpoints: CheckpointTable::empty(),
            pos_start_height: Some(201),
            ..NetworkParameters::mainnet()
        }
    }

    pub fn regtest() -> Self {
        NetworkParameters {
            network: Network::Regtest,
            genesis: GENESIS_HASH,
            checkpoints: CheckpointTable::empty(),
            retarget: Arc::new(FixedBits(REGTEST_POW_LIMIT)),
            pow_limit: REGTEST_POW_LIMIT,
            pos_start_height: Some(251),
            record_size: HEADER_SIZE,
            comparator: Arc::new(LongestChain::default()),
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => NetworkParameters::mainnet(),
            Network::Testnet => NetworkParameters::testnet(),
            Network::Regtest => NetworkParameters::regtest(),
        }
    }

    pub fn with_genesis(mut self, genesis: HashDigest) -> Self {
        self.genesis = genesis;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointTable) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_retarget(mut self, retarget: Arc<dyn Retarget>) -> Self {
        self.retarget = retarget;
        self
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn ChainComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_pos_start_height(mut self, height: Option<u32>) -> Self {
        self.pos_start_height = height;
        self
    }

    pub fn pow_limit_target(&self) -> Target {
        Target::from_compact(self.pow_limit)
    }

    /// Whether the header at `height` must carry proof of work.
    pub fn requires_work(&self, height: u32) -> bool {
        self.pos_start_height.is_none_or(|start| height < start)
    }
}
