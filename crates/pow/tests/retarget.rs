use sispopd_consensus::constants::DIFFICULTY_TARGET_SECONDS;
use sispopd_consensus::{hard_forks, network_version, Network};
use sispopd_pow::{
    difficulty_algorithm, hash_meets_difficulty, DifficultyAlgorithm, DifficultyCache,
};

#[test]
fn mainnet_schedule_selects_algorithm() {
    let forks = hard_forks(Network::Mainnet);
    assert_eq!(
        difficulty_algorithm(network_version(forks, 50)),
        DifficultyAlgorithm::MedianCut
    );
    assert_eq!(
        difficulty_algorithm(network_version(forks, 101)),
        DifficultyAlgorithm::LwmaLegacy
    );
    assert_eq!(
        difficulty_algorithm(network_version(forks, 110)),
        DifficultyAlgorithm::Lwma
    );
}

#[test]
fn faster_blocks_raise_difficulty() {
    let mut steady = DifficultyCache::new();
    let mut fast = DifficultyCache::new();
    for height in 0..80u64 {
        let work = u128::from(height + 1) * 10_000;
        steady
            .push(height, height * DIFFICULTY_TARGET_SECONDS, work)
            .expect("steady push");
        fast.push(height, height * DIFFICULTY_TARGET_SECONDS / 2, work)
            .expect("fast push");
    }

    for version in [7u8, 9, 15] {
        let base = steady.next_difficulty(version, DIFFICULTY_TARGET_SECONDS);
        let raised = fast.next_difficulty(version, DIFFICULTY_TARGET_SECONDS);
        assert!(raised > base, "version {version}: {raised} <= {base}");
    }
}

#[test]
fn low_hashes_pass_high_difficulty() {
    let mut hash = [0u8; 32];
    hash[0] = 0x01;
    assert!(hash_meets_difficulty(&hash, 1 << 100));

    let mut hash = [0u8; 32];
    hash[31] = 0x01;
    assert!(hash_meets_difficulty(&hash, 1 << 7));
    assert!(!hash_meets_difficulty(&hash, 1 << 8));
}
