#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use zephyr_crypto::{HashDigest, meets_target};
use zephyr_headers::store::{CANONICAL_FILE, FORKS_DIR};
use zephyr_headers::{BlockHeader, ChainId, ChainTree, HEADER_SIZE, NetworkParameters};

pub const REGTEST_BITS: u32 = 0x207f_ffff;

/// Parent of every letter, in an order where parents come first.
///
/// ```text
///                                          - M <- N <- X <- Y <- Z
///                                        /
///                           - G <- H <- I <- J <- K <- L
///                         /
/// A <- B <- C <- D <- E <- F <- O <- P <- Q <- R <- S <- T <- U
/// ```
const LETTERS: [(char, Option<char>); 24] = [
    ('A', None),
    ('B', Some('A')),
    ('C', Some('B')),
    ('D', Some('C')),
    ('E', Some('D')),
    ('F', Some('E')),
    ('O', Some('F')),
    ('P', Some('O')),
    ('Q', Some('P')),
    ('R', Some('Q')),
    ('S', Some('R')),
    ('T', Some('S')),
    ('U', Some('T')),
    ('G', Some('F')),
    ('H', Some('G')),
    ('I', Some('H')),
    ('J', Some('I')),
    ('K', Some('J')),
    ('L', Some('K')),
    ('M', Some('I')),
    ('N', Some('M')),
    ('X', Some('N')),
    ('Y', Some('X')),
    ('Z', Some('Y')),
];

/// Builds a header on top of `prev` and grinds the nonce until it meets the regtest target.
pub fn mine(prev: HashDigest, tag: u8, time: u32) -> BlockHeader {
    let mut header = BlockHeader {
        version: 3,
        prev_block: prev,
        merkle_root: [tag; 32],
        time,
        bits: REGTEST_BITS,
        nonce: 0,
        accumulator_checkpoint: [0; 32],
    };
    let limit = zephyr_crypto::Target::from_compact(REGTEST_BITS);
    while !meets_target(&header.hash(), header.bits, &limit) {
        header.nonce += 1;
    }
    header
}

/// Same as [`mine`] but returns a header whose hash misses the target.
pub fn mine_invalid(prev: HashDigest, tag: u8, time: u32) -> BlockHeader {
    let mut header = mine(prev, tag, time);
    let limit = zephyr_crypto::Target::from_compact(REGTEST_BITS);
    while meets_target(&header.hash(), header.bits, &limit) {
        header.nonce += 1;
    }
    header
}

pub struct Letters {
    headers: HashMap<char, BlockHeader>,
}

impl Letters {
    pub fn new() -> Self {
        let mut headers: HashMap<char, BlockHeader> = HashMap::new();
        for (i, (letter, parent)) in LETTERS.iter().enumerate() {
            let prev = parent.map_or(HashDigest::ZERO, |p| headers[&p].hash());
            let header = mine(prev, *letter as u8, 1_600_000_000 + i as u32 * 60);
            headers.insert(*letter, header);
        }
        Letters { headers }
    }

    pub fn get(&self, letter: char) -> &BlockHeader {
        &self.headers[&letter]
    }

    pub fn hash(&self, letter: char) -> HashDigest {
        self.headers[&letter].hash()
    }

    pub fn genesis(&self) -> HashDigest {
        self.hash('A')
    }

    pub fn params(&self) -> NetworkParameters {
        NetworkParameters::regtest().with_genesis(self.genesis())
    }
}

pub fn open(dir: &Path, letters: &Letters) -> ChainTree {
    ChainTree::open(letters.params(), dir).unwrap()
}

/// Checks the header connects, then stores it.
pub fn append(tree: &ChainTree, chain: ChainId, letters: &Letters, names: &str) {
    for letter in names.chars() {
        let header = letters.get(letter);
        assert!(tree.can_connect(chain, header, true), "{letter} does not connect");
        tree.save_header(chain, header).unwrap();
    }
}

pub fn fork_file_count(dir: &Path) -> usize {
    fs::read_dir(dir.join(FORKS_DIR)).unwrap().count()
}

pub fn canonical_size(dir: &Path) -> u64 {
    fs::metadata(dir.join(CANONICAL_FILE)).unwrap().len()
}

pub fn size_of(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

pub fn records(n: u64) -> u64 {
    n * HEADER_SIZE as u64
}

/// Every stored header links to the one below it in `chain`'s view.
pub fn assert_linked(tree: &ChainTree, chain: ChainId) {
    let tip = tree.tip_height(chain).unwrap().unwrap();
    for height in 1..=tip {
        let header = tree.read_header(chain, height).unwrap();
        assert_eq!(
            header.prev_block,
            tree.hash_at_height(chain, height - 1).unwrap(),
            "chain {chain} broken at height {height}"
        );
    }
}

/// Writes the headers for `names` back to back, the way a chain file holds them.
pub fn write_records(path: &Path, letters: &Letters, names: &str) {
    let bytes: Vec<u8> = names
        .chars()
        .flat_map(|letter| letters.get(letter).to_bytes())
        .collect();
    fs::write(path, bytes).unwrap();
}

pub fn staged_file_count(dir: &Path) -> usize {
    fs::read_dir(dir.join(FORKS_DIR))
        .unwrap()
        .filter(|entry| zephyr_headers::store::is_staging_file(&entry.as_ref().unwrap().path()))
        .count()
}
