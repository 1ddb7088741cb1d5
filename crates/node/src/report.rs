//! JSON reports printed by the inspection commands.

use serde::Serialize;
use sispopd_checkpoints::{Checkpoint, CheckpointStore, Checkpoints, HashLine, KvCheckpointStore};
use sispopd_consensus::{hash_to_hex, ConsensusParams, HardFork};
use sispopd_pow::difficulty_algorithm;
use sispopd_storage::KeyValueStore;

#[derive(Debug, Serialize)]
pub struct CheckpointEntry {
    pub height: u64,
    pub hash: String,
    pub kind: &'static str,
    pub signatures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl CheckpointEntry {
    fn new(checkpoint: &Checkpoint, difficulty: Option<u128>) -> Self {
        Self {
            height: checkpoint.height,
            hash: hash_to_hex(&checkpoint.block_hash),
            kind: checkpoint.kind.as_str(),
            signatures: checkpoint.signatures.len(),
            difficulty: difficulty.map(|value| format!("0x{value:x}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeedEntry {
    pub height: u64,
    pub hash: String,
}

#[derive(Debug, Serialize)]
pub struct ConsensusSummary {
    pub target_seconds: u64,
    pub difficulty_window: usize,
    pub difficulty_cut: usize,
    pub checkpoint_interval: u64,
    pub store_persistently_interval: u64,
    pub version_at_top: u8,
    pub newest_known_version: u8,
    pub difficulty_algorithm: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub network: &'static str,
    pub backend: &'static str,
    pub data_dir: String,
    pub read_only: bool,
    pub stored_checkpoints: usize,
    pub top_checkpoint: Option<CheckpointEntry>,
    pub immutable_checkpoint: Option<CheckpointEntry>,
    pub newest_hardcoded: Option<SeedEntry>,
    pub difficulty_points: usize,
    pub consensus: ConsensusSummary,
}

#[derive(Debug, Serialize)]
pub struct HardForkEntry {
    pub version: u8,
    pub snode_revision: u8,
    pub height: u64,
    pub time: u64,
    pub last_height: Option<u64>,
    pub difficulty_algorithm: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HardForkReport {
    pub network: &'static str,
    pub forks: Vec<HardForkEntry>,
}

type Ledger<S> = Checkpoints<KvCheckpointStore<S>>;

pub fn status_report<S: KeyValueStore>(
    ledger: &Ledger<S>,
    params: &ConsensusParams,
    backend: &'static str,
    data_dir: String,
) -> StatusReport {
    let points = ledger.difficulty_points();
    let top_height = ledger.get_max_height();
    let top = ledger.get_checkpoint(top_height);
    let immutable = top
        .as_ref()
        .and_then(|checkpoint| ledger.immutable_checkpoint(checkpoint.height));
    let (version_at_top, newest_known_version) = params.ideal_version(top_height);

    StatusReport {
        network: params.network.as_str(),
        backend,
        data_dir,
        read_only: ledger.store().is_some_and(|store| store.is_read_only()),
        stored_checkpoints: ledger
            .store()
            .and_then(|store| store.len().ok())
            .unwrap_or(0),
        top_checkpoint: top
            .as_ref()
            .map(|checkpoint| CheckpointEntry::new(checkpoint, points.get(&checkpoint.height).copied())),
        immutable_checkpoint: immutable
            .as_ref()
            .map(|checkpoint| CheckpointEntry::new(checkpoint, points.get(&checkpoint.height).copied())),
        newest_hardcoded: params.newest_seed().map(|(height, hash)| SeedEntry {
            height,
            hash: hash_to_hex(&hash),
        }),
        difficulty_points: points.len(),
        consensus: ConsensusSummary {
            target_seconds: params.target_seconds,
            difficulty_window: params.difficulty_window,
            difficulty_cut: params.difficulty_cut,
            checkpoint_interval: params.checkpoint_interval,
            store_persistently_interval: params.checkpoint_store_persistently_interval,
            version_at_top,
            newest_known_version,
            difficulty_algorithm: difficulty_algorithm(version_at_top).as_str(),
        },
    }
}

pub fn checkpoint_entries<S: KeyValueStore>(
    ledger: &Ledger<S>,
    start: Option<u64>,
    end: Option<u64>,
    count: usize,
) -> Vec<CheckpointEntry> {
    let points = ledger.difficulty_points();
    ledger
        .checkpoints_in_range(start, end, count)
        .iter()
        .map(|checkpoint| CheckpointEntry::new(checkpoint, points.get(&checkpoint.height).copied()))
        .collect()
}

/// Entries in the shape read back by `load_new_checkpoints`.
pub fn hash_lines(entries: &[CheckpointEntry]) -> Vec<HashLine> {
    let mut lines: Vec<HashLine> = entries
        .iter()
        .map(|entry| HashLine {
            height: entry.height,
            hash: entry.hash.clone(),
            difficulty: entry.difficulty.clone(),
        })
        .collect();
    lines.sort_by_key(|line| line.height);
    lines
}

pub fn hard_fork_report(params: &ConsensusParams) -> HardForkReport {
    HardForkReport {
        network: params.network.as_str(),
        forks: params
            .hard_forks
            .iter()
            .map(|fork| hard_fork_entry(params, fork))
            .collect(),
    }
}

fn hard_fork_entry(params: &ConsensusParams, fork: &HardFork) -> HardForkEntry {
    HardForkEntry {
        version: fork.version,
        snode_revision: fork.snode_revision,
        height: fork.height,
        time: fork.time,
        last_height: params.height_range_for_version(fork.version).1,
        difficulty_algorithm: difficulty_algorithm(fork.version).as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sispopd_consensus::{consensus_params, Network, MAINNET_CHECKPOINTS};
    use sispopd_storage::memory::MemoryStore;

    fn mainnet_ledger() -> Ledger<MemoryStore> {
        let mut ledger = Checkpoints::new();
        let store = KvCheckpointStore::open(MemoryStore::new()).expect("open");
        assert!(ledger.init(Network::Mainnet, store));
        ledger
    }

    #[test]
    fn status_describes_seeded_mainnet() {
        let ledger = mainnet_ledger();
        let params = consensus_params(Network::Mainnet);
        let report = status_report(&ledger, &params, "memory", "data".to_string());

        assert_eq!(report.network, "mainnet");
        assert_eq!(report.stored_checkpoints, MAINNET_CHECKPOINTS.len());
        let top = report.top_checkpoint.expect("top");
        assert_eq!(top.height, 99_704);
        assert_eq!(top.kind, "hardcoded");
        assert_eq!(top.difficulty.as_deref(), Some("0x2480f7e86e50"));
        assert_eq!(report.immutable_checkpoint.map(|cp| cp.height), Some(99_704));
        assert_eq!(report.newest_hardcoded.map(|seed| seed.height), Some(99_704));
        assert_eq!(report.difficulty_points, MAINNET_CHECKPOINTS.len());

        let json = serde_json::to_value(&report.consensus).expect("json");
        assert_eq!(json["difficulty_window"], 60);
        assert_eq!(json["difficulty_cut"], 6);
    }

    #[test]
    fn exported_lines_are_ascending() {
        let ledger = mainnet_ledger();
        let entries = checkpoint_entries(&ledger, None, None, 3);
        assert_eq!(entries[0].height, 99_704);

        let lines = hash_lines(&entries);
        let heights: Vec<u64> = lines.iter().map(|line| line.height).collect();
        assert_eq!(heights, vec![90_000, 95_000, 99_704]);
        assert!(lines.iter().all(|line| line.difficulty.is_some()));
    }

    #[test]
    fn hard_fork_entries_close_ranges() {
        let report = hard_fork_report(&consensus_params(Network::Mainnet));
        let first = &report.forks[0];
        assert_eq!(first.version, 7);
        assert!(first.last_height.is_some());
        let last = report.forks.last().expect("forks");
        assert_eq!(last.last_height, None);
        assert_eq!(last.difficulty_algorithm, "lwma");
    }

    #[test]
    fn testnet_revision_rows_share_range() {
        let report = hard_fork_report(&consensus_params(Network::Testnet));
        let v17 = report.forks.iter().find(|fork| fork.version == 17).expect("v17");
        assert_eq!(v17.last_height, Some(501_749));
        let revisions: Vec<(u8, Option<u64>)> = report
            .forks
            .iter()
            .filter(|fork| fork.version == 18)
            .map(|fork| (fork.snode_revision, fork.last_height))
            .collect();
        assert_eq!(revisions, vec![(0, None), (1, None)]);
    }
}
