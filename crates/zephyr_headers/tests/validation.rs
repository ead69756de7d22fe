mod common;

use std::io::Cursor;

use common::*;
use zephyr_crypto::DiffError;
use zephyr_headers::{BlockHeader, ChainError, ChainTree, CheckpointTable, JsonlSource, import_all};

#[test]
fn genesis_must_match_network() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    assert_eq!(None, tree.tip_height(root).unwrap());

    assert!(matches!(
        tree.save_header(root, letters.get('B')),
        Err(ChainError::Disconnected { height: 0, .. })
    ));
    assert_eq!(0, canonical_size(dir.path()));

    tree.save_header(root, letters.get('A')).unwrap();
    assert_eq!(Some(0), tree.tip_height(root).unwrap());
}

#[test]
fn disconnected_header_leaves_files_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    append(&tree, root, &letters, "ABC");

    assert!(!tree.can_connect(root, letters.get('E'), true));
    assert!(matches!(
        tree.save_header(root, letters.get('E')),
        Err(ChainError::Disconnected { height: 3, .. })
    ));
    assert_eq!(records(3), canonical_size(dir.path()));
    assert_eq!(0, fork_file_count(dir.path()));
}

#[test]
fn proof_of_work_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    append(&tree, root, &letters, "AB");

    let weak = mine_invalid(letters.hash('B'), b'w', 1_700_000_000);
    assert!(tree.can_connect(root, &weak, false));
    assert!(matches!(
        tree.check_connect(root, &weak, true),
        Err(ChainError::InvalidProofOfWork {
            height: 2,
            source: DiffError::HashAboveTarget(_),
        })
    ));

    let mut wrong_bits = mine(letters.hash('B'), b'b', 1_700_000_000);
    wrong_bits.bits = 0x1f7f_ffff;
    let limit = zephyr_crypto::Target::from_compact(wrong_bits.bits);
    while !zephyr_crypto::meets_target(&wrong_bits.hash(), wrong_bits.bits, &limit) {
        wrong_bits.nonce += 1;
    }
    assert!(matches!(
        tree.save_header(root, &wrong_bits),
        Err(ChainError::InvalidProofOfWork {
            source: DiffError::BitsMismatch { .. },
            ..
        })
    ));
    assert_eq!(records(2), canonical_size(dir.path()));
}

#[test]
fn proof_of_stake_heights_skip_work() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let params = letters.params().with_pos_start_height(Some(2));
    let tree = ChainTree::open(params, dir.path()).unwrap();
    let root = tree.root();
    append(&tree, root, &letters, "AB");

    let staked = mine_invalid(letters.hash('B'), b's', 1_700_000_000);
    tree.save_header(root, &staked).unwrap();
    assert_eq!(Some(2), tree.tip_height(root).unwrap());
}

#[test]
fn checkpoints_pin_hashes_and_bound_forks() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let table = CheckpointTable::new(vec![letters.hash('D')], 4).unwrap();
    let tree = ChainTree::open(letters.params().with_checkpoints(table), dir.path()).unwrap();
    let root = tree.root();
    append(&tree, root, &letters, "ABC");

    // Height 3 is pinned to D.
    let impostor = mine(letters.hash('C'), b'i', 1_700_000_000);
    assert!(matches!(
        tree.save_header(root, &impostor),
        Err(ChainError::CheckpointMismatch { height: 3, .. })
    ));
    append(&tree, root, &letters, "DEFO");

    // Inside the horizon no fork may start.
    let early = mine(letters.hash('A'), b'e', 1_700_000_000);
    assert!(matches!(
        tree.fork(root, &early),
        Err(ChainError::CheckpointMismatch { height: 1, .. })
    ));
    assert!(matches!(
        tree.fork_at(root, 2, &mine(letters.hash('B'), b'e', 1_700_000_000)),
        Err(ChainError::CheckpointMismatch { height: 2, .. })
    ));
    assert_eq!(0, fork_file_count(dir.path()));

    // Above it forks are fine.
    let fork = tree.fork(root, letters.get('G')).unwrap();
    assert_eq!(6, tree.info(fork).unwrap().forkpoint);
}

#[test]
fn unpinned_heights_below_horizon_skip_work() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let table = CheckpointTable::new(vec![letters.hash('D')], 4).unwrap();
    let tree = ChainTree::open(letters.params().with_checkpoints(table), dir.path()).unwrap();
    let root = tree.root();
    append(&tree, root, &letters, "A");

    let trusted = mine_invalid(letters.hash('A'), b't', 1_700_000_000);
    assert!(tree.is_header_valid(1, &trusted));
    tree.save_header(root, &trusted).unwrap();
    assert_eq!(Some(1), tree.tip_height(root).unwrap());
}

#[test]
fn malformed_records_are_refused() {
    let letters = Letters::new();
    let bytes = letters.get('B').to_bytes();
    assert!(matches!(
        BlockHeader::read(&bytes[..111]),
        Err(ChainError::MalformedHeader(_))
    ));
    assert!(matches!(
        BlockHeader::from_hex("zz"),
        Err(ChainError::MalformedHeader(_))
    ));

    // Refused records never reach the files.
    let dir = tempfile::tempdir().unwrap();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    append(&tree, root, &letters, "ABC");
    let early_accumulator = BlockHeader {
        accumulator_checkpoint: [1; 32],
        ..*letters.get('D')
    };
    let short = hex::encode(&letters.get('D').to_bytes()[..111]);
    let lines = [
        format!(r#"{{"height": 3, "header_hex": "{short}"}}"#),
        format!(r#"{{"height": 3, "header_hex": "{}"}}"#, early_accumulator.to_hex()),
    ];
    let mut source = JsonlSource::new(Cursor::new(lines.join("\n")));
    let report = import_all(&tree, &mut source).unwrap();
    assert_eq!(0, report.extended + report.forked + report.known);
    assert_eq!(2, report.rejected.len());
    assert!(report
        .rejected
        .iter()
        .all(|r| matches!(r.error, ChainError::MalformedHeader(_))));
    assert_eq!(root, tree.root());
    assert_eq!(0, tree.generation());
    assert_eq!(Some(letters.hash('C')), tree.tip_hash(root).unwrap());
    assert_eq!(records(3), canonical_size(dir.path()));
    assert_eq!(0, fork_file_count(dir.path()));
}

#[test]
fn fork_requires_a_parent_below_the_tip() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    append(&tree, root, &letters, "ABCDEF");

    // Z's parent is nowhere on the chain.
    assert!(matches!(
        tree.fork(root, letters.get('Z')),
        Err(ChainError::Disconnected { .. })
    ));
    // O extends the tip: not a fork.
    assert!(matches!(
        tree.fork_at(root, 6, letters.get('O')),
        Err(ChainError::HeightOutOfRange { height: 6, .. })
    ));
    // A header already stored is not duplicated.
    assert_eq!(root, tree.fork_at(root, 3, letters.get('D')).unwrap());
    assert_eq!(1, tree.chains().len());
    assert_eq!(0, fork_file_count(dir.path()));
}

#[test]
fn height_lookups_walk_to_the_parent() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    append(&tree, root, &letters, "ABCDEFOP");
    let fork = tree.fork(root, letters.get('G')).unwrap();

    assert_eq!(letters.hash('C'), tree.hash_at_height(fork, 2).unwrap());
    assert_eq!(letters.hash('G'), tree.hash_at_height(fork, 6).unwrap());
    assert_eq!(*letters.get('F'), tree.read_header(fork, 5).unwrap());
    assert!(matches!(
        tree.hash_at_height(fork, 7),
        Err(ChainError::HeightOutOfRange { height: 7, .. })
    ));
    assert!(matches!(
        tree.hash_at_height(root, 8),
        Err(ChainError::HeightOutOfRange { height: 8, .. })
    ));
}

#[test]
fn prune_removes_leaf_forks_only() {
    let dir = tempfile::tempdir().unwrap();
    let letters = Letters::new();
    let tree = open(dir.path(), &letters);
    let root = tree.root();
    append(&tree, root, &letters, "ABCDEFOPQRS");
    let chain_l = tree.fork(root, letters.get('G')).unwrap();
    append(&tree, chain_l, &letters, "HIJ");
    let chain_m = tree.fork(chain_l, letters.get('M')).unwrap();
    assert_eq!(root, tree.root());

    assert!(!tree.prune(root).unwrap());
    assert!(!tree.prune(chain_l).unwrap());
    let m_path = tree.info(chain_m).unwrap().path;
    assert!(tree.prune(chain_m).unwrap());
    assert!(!m_path.exists());
    assert!(matches!(tree.info(chain_m), Err(ChainError::UnknownChain(_))));

    assert!(tree.prune(chain_l).unwrap());
    assert_eq!(vec![root], tree.chains());
    assert_eq!(0, fork_file_count(dir.path()));
}
