use std::fs;

use sispopd_checkpoints::{
    AddedBlock, Checkpoint, CheckpointKind, CheckpointStore, Checkpoints, KvCheckpointStore,
};
use sispopd_consensus::{hash_from_hex, hash_to_hex, Network, MAINNET_CHECKPOINTS};
use sispopd_storage::memory::MemoryStore;

type Ledger = Checkpoints<KvCheckpointStore<MemoryStore>>;

fn quiet_capture() {
    sispopd_log::set_stderr_enabled(false);
    sispopd_log::enable_capture(4096);
}

fn ledger(network: Network) -> Ledger {
    let mut ledger = Checkpoints::new();
    let store = KvCheckpointStore::open(MemoryStore::new()).expect("open store");
    assert!(ledger.init(network, store));
    ledger
}

fn hash_for(height: u64, tag: u8) -> [u8; 32] {
    let mut hash = [tag; 32];
    hash[..8].copy_from_slice(&height.to_le_bytes());
    hash
}

fn sn(height: u64) -> Checkpoint {
    Checkpoint::service_node(height, hash_for(height, 0x5a), Vec::new())
}

fn stored_heights(ledger: &Ledger) -> Vec<u64> {
    ledger
        .checkpoints_in_range(Some(0), Some(u64::MAX), 0)
        .iter()
        .map(|checkpoint| checkpoint.height)
        .collect()
}

/// Service node checkpoints on every grid height in `from..=to`.
fn fill_grid(ledger: &mut Ledger, from: u64, to: u64) {
    for height in (from..=to).step_by(4) {
        assert!(ledger.update_checkpoint(&sn(height)), "height {height}");
    }
}

const V12: u8 = 12;

#[test]
fn mainnet_seeds_roundtrip() {
    let ledger = ledger(Network::Mainnet);
    for seed in MAINNET_CHECKPOINTS {
        let checkpoint = ledger.get_checkpoint(seed.height).expect("seeded");
        assert_eq!(hash_to_hex(&checkpoint.block_hash), seed.hash);
        assert_eq!(checkpoint.kind, CheckpointKind::Hardcoded);
    }
    assert_eq!(ledger.get_max_height(), 99_704);
    assert!(ledger.is_in_checkpoint_zone(99_704));
    assert!(!ledger.is_in_checkpoint_zone(99_705));
    assert_eq!(ledger.get_checkpoint(5_001), None);
}

#[test]
fn reinit_is_idempotent() {
    let store = KvCheckpointStore::open(MemoryStore::new()).expect("open store");
    let mut ledger = Checkpoints::new();
    assert!(ledger.init(Network::Mainnet, store));
    let store = KvCheckpointStore::open(MemoryStore::new()).expect("open store");
    assert!(ledger.init(Network::Mainnet, store));
    assert_eq!(stored_heights(&ledger).len(), MAINNET_CHECKPOINTS.len());
}

#[test]
fn conflicting_hash_is_rejected() {
    quiet_capture();
    let mut ledger = ledger(Network::Mainnet);
    let seed = MAINNET_CHECKPOINTS[3];
    let other = "00".repeat(32);

    assert!(ledger.add_checkpoint(seed.height, seed.hash, ""));
    assert!(!ledger.add_checkpoint(seed.height, &other, ""));

    let forged = Checkpoint::service_node(
        seed.height,
        hash_from_hex(&other).expect("hex"),
        Vec::new(),
    );
    assert!(!ledger.update_checkpoint(&forged));

    let kept = ledger.get_checkpoint(seed.height).expect("still stored");
    assert_eq!(hash_to_hex(&kept.block_hash), seed.hash);
    assert!(!ledger.add_checkpoint(1, "not hex", ""));
}

#[test]
fn service_node_checkpoint_can_gain_votes() {
    let mut ledger = ledger(Network::Testnet);
    assert!(ledger.update_checkpoint(&sn(8)));

    let mut voted = sn(8);
    voted.signatures.push(sispopd_checkpoints::VoterSignature {
        voter_index: 4,
        signature: [9; 64],
    });
    assert!(ledger.update_checkpoint(&voted));
    assert_eq!(ledger.get_checkpoint(8), Some(voted));
}

#[test]
fn block_added_culls_behind_immutable_checkpoint() {
    let mut ledger = ledger(Network::Testnet);
    fill_grid(&mut ledger, 4, 200);

    assert!(ledger.block_added(
        &AddedBlock {
            height: 200,
            major_version: V12,
        },
        None,
    ));

    // Immutable checkpoint at 201 is 196; culling covers [136, 196) except 180.
    let heights = stored_heights(&ledger);
    assert!(heights.contains(&132));
    assert!(!heights.contains(&136));
    assert!(!heights.contains(&176));
    assert!(heights.contains(&180));
    assert!(!heights.contains(&192));
    assert!(heights.contains(&196));
    assert!(heights.contains(&200));
    assert_eq!(ledger.last_cull_height(), 196);

    let before = heights.clone();
    assert!(ledger.block_added(
        &AddedBlock {
            height: 200,
            major_version: V12,
        },
        None,
    ));
    assert_eq!(stored_heights(&ledger), before);

    assert!(ledger.block_added(
        &AddedBlock {
            height: 204,
            major_version: V12,
        },
        Some(&sn(204)),
    ));
    assert_eq!(ledger.get_checkpoint(204), Some(sn(204)));
    assert_eq!(ledger.get_max_height(), 204);
}

#[test]
fn block_added_skips_early_and_old_blocks() {
    let mut ledger = ledger(Network::Testnet);
    fill_grid(&mut ledger, 4, 200);
    let all = stored_heights(&ledger);

    assert!(ledger.block_added(
        &AddedBlock {
            height: 59,
            major_version: V12,
        },
        Some(&sn(220)),
    ));
    assert!(ledger.block_added(
        &AddedBlock {
            height: 200,
            major_version: 11,
        },
        None,
    ));
    assert_eq!(stored_heights(&ledger), all);
    assert_eq!(ledger.last_cull_height(), 0);
}

#[test]
fn detach_removes_grid_heights_from_top() {
    let mut ledger = ledger(Network::Testnet);
    fill_grid(&mut ledger, 4, 200);
    assert!(ledger.block_added(
        &AddedBlock {
            height: 200,
            major_version: V12,
        },
        None,
    ));
    assert_eq!(ledger.last_cull_height(), 196);

    ledger.blockchain_detached(150);
    assert_eq!(ledger.last_cull_height(), 148);
    let heights = stored_heights(&ledger);
    assert_eq!(heights.last(), Some(&132));
    assert_eq!(ledger.get_max_height(), 132);

    ledger.blockchain_detached(0);
    assert!(stored_heights(&ledger).is_empty());
}

#[test]
fn culling_resumes_after_detach_off_grid() {
    let mut ledger = ledger(Network::Testnet);
    fill_grid(&mut ledger, 4, 200);
    assert!(ledger.block_added(
        &AddedBlock {
            height: 200,
            major_version: V12,
        },
        None,
    ));

    ledger.blockchain_detached(190);
    assert_eq!(ledger.last_cull_height(), 188);
    assert_eq!(ledger.get_max_height(), 180);

    fill_grid(&mut ledger, 192, 400);
    for height in (204..=400).step_by(4) {
        assert!(ledger.block_added(
            &AddedBlock {
                height,
                major_version: V12,
            },
            None,
        ));
    }
    assert_eq!(ledger.last_cull_height(), 396);

    // Everything between the detach point and the immutable checkpoint at 396
    // is culled except the persistent multiples of 60.
    let mut expected: Vec<u64> = (4..=132).step_by(4).collect();
    expected.extend([180, 240, 300, 360, 396, 400]);
    assert_eq!(stored_heights(&ledger), expected);
}

#[test]
fn detach_keeps_heights_below_grid_floor() {
    let mut ledger = ledger(Network::Mainnet);
    ledger.blockchain_detached(0);
    // Only the genesis checkpoint sits below the first grid step.
    assert_eq!(stored_heights(&ledger), vec![0]);
}

#[test]
fn alternative_blocks_respect_immutable_height() {
    quiet_capture();
    let mut ledger = ledger(Network::Testnet);

    assert!(!ledger.is_alternative_block_allowed(10, 0).allowed);
    assert!(ledger.is_alternative_block_allowed(10, 1).allowed);

    fill_grid(&mut ledger, 40, 100);
    // No checkpoint at or below the tip yet.
    assert!(ledger.is_alternative_block_allowed(39, 5).allowed);

    let check = ledger.is_alternative_block_allowed(100, 96);
    assert!(!check.allowed);
    assert!(check.is_service_node_checkpoint);
    assert!(!ledger.is_alternative_block_allowed(100, 50).allowed);
    assert!(ledger.is_alternative_block_allowed(100, 97).allowed);
    assert_eq!(ledger.immutable_height(), 96);

    // The cached immutable height never moves back within a session.
    ledger.blockchain_detached(60);
    assert!(!ledger.is_alternative_block_allowed(100, 90).allowed);
    assert_eq!(ledger.immutable_height(), 96);

    assert!(ledger.update_checkpoint(&Checkpoint::hardcoded(200, [3; 32])));
    let check = ledger.is_alternative_block_allowed(300, 200);
    assert!(!check.allowed);
    assert!(!check.is_service_node_checkpoint);
    assert!(ledger.is_alternative_block_allowed(300, 201).allowed);
}

#[test]
fn check_block_reports_kind_and_mismatch() {
    quiet_capture();
    let mut ledger = ledger(Network::Testnet);
    assert!(ledger.update_checkpoint(&sn(7_004)));
    assert!(ledger.update_checkpoint(&Checkpoint::hardcoded(7_008, [1; 32])));

    let unpinned = ledger.check_block(7_000, &[0; 32]);
    assert!(unpinned.passes);
    assert!(!unpinned.is_checkpoint);

    let pinned = ledger.check_block(7_004, &hash_for(7_004, 0x5a));
    assert!(pinned.passes && pinned.is_checkpoint && pinned.is_service_node_checkpoint);

    let wrong = ledger.check_block(7_008, &[2; 32]);
    assert!(!wrong.passes);
    assert!(wrong.is_checkpoint);
    assert!(!wrong.is_service_node_checkpoint);
    assert!(!sispopd_log::captured_matching("checkpoints", "CHECKPOINT FAILED FOR HEIGHT 7008")
        .is_empty());
}

#[test]
fn range_queries() {
    let mut ledger = ledger(Network::Testnet);
    fill_grid(&mut ledger, 4, 40);
    let heights = |list: Vec<Checkpoint>| list.iter().map(|cp| cp.height).collect::<Vec<_>>();

    assert_eq!(heights(ledger.checkpoints_in_range(None, None, 3)), vec![40, 36, 32]);
    assert_eq!(heights(ledger.checkpoints_in_range(None, Some(10), 5)), vec![8, 4]);
    assert_eq!(heights(ledger.checkpoints_in_range(Some(30), None, 2)), vec![32, 36]);
    assert_eq!(
        heights(ledger.checkpoints_in_range(Some(12), Some(24), 1)),
        vec![12, 16, 20, 24]
    );
    assert_eq!(heights(ledger.checkpoints_in_range(Some(24), Some(12), 0)), vec![24, 20, 16, 12]);

    fill_grid(&mut ledger, 44, 4 * 300);
    assert_eq!(ledger.checkpoints_in_range(None, None, 1_000).len(), 256);

    let immutable = ledger.immutable_checkpoint(1_000).expect("immutable");
    assert_eq!(immutable.height, 996);
    assert_eq!(ledger.immutable_checkpoint(3), None);
}

#[test]
fn json_checkpoints_are_added() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("checkpoints.json");
    let hash = "ab".repeat(32);
    fs::write(
        &path,
        format!(
            r#"{{"hashlines":[{{"height":120,"hash":"{hash}","difficulty":"0x400"}},{{"height":240,"hash":"{hash}"}}]}}"#
        ),
    )
    .expect("write");

    let mut ledger = ledger(Network::Testnet);
    assert!(ledger.load_new_checkpoints(&path));
    assert_eq!(ledger.get_max_height(), 240);
    assert_eq!(ledger.difficulty_points().get(&120), Some(&0x400));
    assert!(ledger.load_new_checkpoints(&dir.path().join("missing.json")));

    fs::write(&path, r#"{"hashlines": 5}"#).expect("write");
    assert!(!ledger.load_new_checkpoints(&path));
}

#[test]
fn read_only_store_skips_seeding() {
    let mut ledger = Checkpoints::new();
    let store = KvCheckpointStore::read_only(MemoryStore::new()).expect("open");
    assert!(ledger.init(Network::Mainnet, store));
    assert_eq!(ledger.get_max_height(), 0);
    assert!(!ledger.update_checkpoint(&sn(4)));
    assert!(ledger.store().is_some_and(|store| store.is_read_only()));
}
