//! Checkpoint ledger: pins heights to hashes and gates reorganisations.
//!
//! Every store fault is logged under the `checkpoints` target and turned into
//! a boolean or empty answer; nothing here returns a store error to callers.

use std::collections::BTreeMap;
use std::path::Path;

use sispopd_consensus::constants::MAX_CHECKPOINTS_QUERY;
use sispopd_consensus::{
    consensus_params, difficulty_from_hex, hash_from_hex, hash_to_hex, ConsensusParams, Hash256,
    Network, NetworkVersion,
};
use sispopd_log::{log_error, log_info, log_warn};
use sispopd_storage::StoreError;

use crate::checkpoint::Checkpoint;
use crate::json::load_checkpoints_from_json;
use crate::store::CheckpointStore;

/// The parts of a newly connected block the ledger looks at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddedBlock {
    pub height: u64,
    pub major_version: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockCheck {
    pub passes: bool,
    pub is_checkpoint: bool,
    pub is_service_node_checkpoint: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AltBlockCheck {
    pub allowed: bool,
    pub is_service_node_checkpoint: bool,
}

pub struct Checkpoints<S> {
    db: Option<S>,
    network: Network,
    checkpoint_interval: u64,
    store_persistently_interval: u64,
    last_cull_height: u64,
    immutable_height: u64,
    difficulty_points: BTreeMap<u64, u128>,
}

impl<S> Default for Checkpoints<S> {
    fn default() -> Self {
        Self::from_params(None, &consensus_params(Network::Mainnet))
    }
}

impl<S> Checkpoints<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_params(db: Option<S>, params: &ConsensusParams) -> Self {
        Self {
            db,
            network: params.network,
            checkpoint_interval: params.checkpoint_interval.max(1),
            store_persistently_interval: params.checkpoint_store_persistently_interval.max(1),
            last_cull_height: 0,
            immutable_height: 0,
            difficulty_points: BTreeMap::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn store(&self) -> Option<&S> {
        self.db.as_ref()
    }

    /// Cumulative difficulties of the checkpoints added with one.
    pub fn difficulty_points(&self) -> &BTreeMap<u64, u128> {
        &self.difficulty_points
    }

    pub fn last_cull_height(&self) -> u64 {
        self.last_cull_height
    }

    pub fn immutable_height(&self) -> u64 {
        self.immutable_height
    }

    fn db(&self) -> Result<&S, StoreError> {
        self.db.as_ref().ok_or_else(unbound)
    }
}

fn unbound() -> StoreError {
    StoreError::Backend("checkpoint store not initialised".to_string())
}

impl<S: CheckpointStore> Checkpoints<S> {
    /// Resets the ledger onto `store` and seeds the compiled-in checkpoints.
    pub fn init(&mut self, network: Network, store: S) -> bool {
        self.init_with_params(&consensus_params(network), store)
    }

    pub fn init_with_params(&mut self, params: &ConsensusParams, store: S) -> bool {
        *self = Self::from_params(Some(store), params);
        if self.db.as_ref().is_some_and(|db| db.is_read_only()) {
            return true;
        }

        for seed in params.checkpoints {
            if !self.add_checkpoint(seed.height, seed.hash, seed.difficulty) {
                log_error!(
                    target: "checkpoints",
                    "failed to seed checkpoint at height {}",
                    seed.height
                );
                return false;
            }
        }
        if !params.checkpoints.is_empty() {
            log_info!(
                target: "checkpoints",
                "seeded {} {} checkpoints",
                params.checkpoints.len(),
                params.network
            );
        }
        true
    }

    pub fn get_checkpoint(&self, height: u64) -> Option<Checkpoint> {
        let result = self.db().and_then(|db| {
            let _txn = db.read_txn()?;
            db.get_block_checkpoint(height)
        });
        match result {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Get block checkpoint from DB failed at height: {}, what = {}",
                    height,
                    err
                );
                None
            }
        }
    }

    /// Records a hardcoded checkpoint. An existing checkpoint at `height`
    /// must carry the same hash. An empty `difficulty_hex` records no
    /// difficulty point.
    pub fn add_checkpoint(&mut self, height: u64, hash_hex: &str, difficulty_hex: &str) -> bool {
        let hash = match hash_from_hex(hash_hex) {
            Ok(hash) => hash,
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Failed to parse checkpoint hash string into binary representation: {}",
                    err
                );
                return false;
            }
        };
        let difficulty = if difficulty_hex.trim().is_empty() {
            None
        } else {
            match difficulty_from_hex(difficulty_hex) {
                Ok(value) => Some(value),
                Err(err) => {
                    log_error!(
                        target: "checkpoints",
                        "Failed to parse checkpoint difficulty {:?}: {}",
                        difficulty_hex,
                        err
                    );
                    return false;
                }
            }
        };

        let stored = match self.get_checkpoint(height) {
            Some(existing) => {
                if existing.block_hash != hash {
                    log_error!(
                        target: "checkpoints",
                        "Checkpoint at given height {} already exists, and hash for new checkpoint was different!",
                        height
                    );
                    return false;
                }
                true
            }
            None => self.update_checkpoint(&Checkpoint::hardcoded(height, hash)),
        };

        if stored {
            if let Some(difficulty) = difficulty {
                self.difficulty_points.insert(height, difficulty);
            }
        }
        stored
    }

    /// Persists an already validated checkpoint. Fails when a checkpoint with a
    /// different hash is stored at the same height.
    pub fn update_checkpoint(&mut self, checkpoint: &Checkpoint) -> bool {
        match self.db.as_ref() {
            Some(db) => persist(db, checkpoint),
            None => {
                log_error!(
                    target: "checkpoints",
                    "Failed to add checkpoint at height: {}, what = {}",
                    checkpoint.height,
                    unbound()
                );
                false
            }
        }
    }

    /// Culls checkpoints made redundant by the newest immutable one, then
    /// stores `checkpoint` if given.
    pub fn block_added(&mut self, block: &AddedBlock, checkpoint: Option<&Checkpoint>) -> bool {
        let height = block.height;
        if height < self.store_persistently_interval
            || block.major_version < NetworkVersion::V12Checkpointing.as_u8()
        {
            return true;
        }
        let Some(db) = self.db.as_ref() else {
            log_error!(target: "checkpoints", "block added at height {} before init", height);
            return false;
        };

        let end_cull_height = match db.get_immutable_checkpoint(height.saturating_add(1)) {
            Ok(immutable) => immutable.map_or(0, |checkpoint| checkpoint.height),
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Looking up immutable checkpoint for height {} failed, what = {}",
                    height,
                    err
                );
                0
            }
        };
        let mut start_cull_height =
            end_cull_height.saturating_sub(self.store_persistently_interval);
        let misalignment = start_cull_height % self.checkpoint_interval;
        if misalignment > 0 {
            start_cull_height += self.checkpoint_interval - misalignment;
        }
        self.last_cull_height = self.last_cull_height.max(start_cull_height);

        let txn = match db.write_txn() {
            Ok(txn) => txn,
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Pruning block checkpoints at height {} could not start, what = {}",
                    height,
                    err
                );
                return false;
            }
        };
        while self.last_cull_height < end_cull_height {
            let cull = self.last_cull_height;
            if cull % self.store_persistently_interval != 0 {
                if let Err(err) = db.remove_block_checkpoint(cull) {
                    log_error!(
                        target: "checkpoints",
                        "Pruning block checkpoint on block added failed non-trivially at height: {}, what = {}",
                        cull,
                        err
                    );
                }
            }
            self.last_cull_height += self.checkpoint_interval;
        }

        if let Some(checkpoint) = checkpoint {
            persist(db, checkpoint);
        }
        drop(txn);
        true
    }

    /// Removes grid checkpoints at or above `height` after a rollback.
    pub fn blockchain_detached(&mut self, height: u64) {
        // Stay on the checkpoint grid or later culls step over every checkpoint.
        let grid_height = height - height % self.checkpoint_interval;
        self.last_cull_height = self.last_cull_height.min(grid_height);
        let Some(db) = self.db.as_ref() else {
            return;
        };

        let _txn = match db.write_txn() {
            Ok(txn) => txn,
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Detaching checkpoints from height {} could not start, what = {}",
                    height,
                    err
                );
                return;
            }
        };
        let top = match db.get_top_checkpoint() {
            Ok(Some(top)) => top.height,
            Ok(None) => return,
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Reading top checkpoint on detach failed, what = {}",
                    err
                );
                return;
            }
        };

        let mut delete_height = top;
        while delete_height >= height && delete_height >= self.checkpoint_interval {
            if let Err(err) = db.remove_block_checkpoint(delete_height) {
                log_error!(
                    target: "checkpoints",
                    "Remove block checkpoint on detach failed non-trivially at height: {}, what = {}",
                    delete_height,
                    err
                );
            }
            delete_height -= self.checkpoint_interval;
        }
    }

    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        height <= self.get_max_height()
    }

    pub fn check_block(&self, height: u64, hash: &Hash256) -> BlockCheck {
        match self.get_checkpoint(height) {
            None => BlockCheck {
                passes: true,
                is_checkpoint: false,
                is_service_node_checkpoint: false,
            },
            Some(checkpoint) => BlockCheck {
                passes: checkpoint.check(hash),
                is_checkpoint: true,
                is_service_node_checkpoint: checkpoint.is_service_node(),
            },
        }
    }

    /// Whether a competing block at `block_height` may replace the main chain
    /// whose tip is at `blockchain_height`.
    pub fn is_alternative_block_allowed(
        &mut self,
        blockchain_height: u64,
        block_height: u64,
    ) -> AltBlockCheck {
        let mut result = AltBlockCheck {
            allowed: false,
            is_service_node_checkpoint: false,
        };
        if block_height == 0 {
            return result;
        }

        if let Some(db) = self.db.as_ref() {
            match db.get_checkpoints_range(0, blockchain_height, 1) {
                Ok(first) => {
                    if first
                        .first()
                        .map_or(true, |checkpoint| blockchain_height < checkpoint.height)
                    {
                        result.allowed = true;
                        return result;
                    }
                }
                Err(err) => log_error!(
                    target: "checkpoints",
                    "Reading first checkpoint below height {} failed, what = {}",
                    blockchain_height,
                    err
                ),
            }

            match db.get_immutable_checkpoint(blockchain_height) {
                Ok(Some(immutable)) => {
                    result.is_service_node_checkpoint = immutable.is_service_node();
                    self.immutable_height = self.immutable_height.max(immutable.height);
                }
                Ok(None) => {}
                Err(err) => log_error!(
                    target: "checkpoints",
                    "Reading immutable checkpoint at height {} failed, what = {}",
                    blockchain_height,
                    err
                ),
            }
        }

        result.allowed = block_height > self.immutable_height;
        if !result.allowed {
            log_warn!(
                target: "checkpoints",
                "rejecting alternative block at height {}: immutable height is {}",
                block_height,
                self.immutable_height
            );
        }
        result
    }

    /// Height of the newest stored checkpoint, 0 when there is none.
    pub fn get_max_height(&self) -> u64 {
        let result = self.db().and_then(|db| {
            let _txn = db.read_txn()?;
            db.get_top_checkpoint()
        });
        match result {
            Ok(top) => top.map_or(0, |checkpoint| checkpoint.height),
            Err(err) => {
                log_error!(target: "checkpoints", "Reading top checkpoint failed, what = {}", err);
                0
            }
        }
    }

    pub fn immutable_checkpoint(&self, height: u64) -> Option<Checkpoint> {
        let result = self.db().and_then(|db| {
            let _txn = db.read_txn()?;
            db.get_immutable_checkpoint(height)
        });
        result.unwrap_or_else(|err| {
            log_error!(
                target: "checkpoints",
                "Reading immutable checkpoint at height {} failed, what = {}",
                height,
                err
            );
            None
        })
    }

    /// Checkpoint listing with optional bounds.
    ///
    /// Without bounds the newest `count` are returned from the top down. With
    /// only `end` the walk goes down from `end`, with only `start` it goes up
    /// from `start`. `count` is capped at [`MAX_CHECKPOINTS_QUERY`] for those
    /// forms. With both bounds every checkpoint in the inclusive range is
    /// returned.
    pub fn checkpoints_in_range(
        &self,
        start: Option<u64>,
        end: Option<u64>,
        count: usize,
    ) -> Vec<Checkpoint> {
        let count = count.min(MAX_CHECKPOINTS_QUERY);
        let result = self.db().and_then(|db| {
            let _txn = db.read_txn()?;
            match (start, end) {
                (None, None) => match db.get_top_checkpoint()? {
                    Some(top) => db.get_checkpoints_range(top.height, 0, count),
                    None => Ok(Vec::new()),
                },
                (None, Some(end)) => db.get_checkpoints_range(end, 0, count),
                (Some(start), None) => db.get_checkpoints_range(start, u64::MAX, count),
                (Some(start), Some(end)) => db.get_checkpoints_range(start, end, usize::MAX),
            }
        });
        result.unwrap_or_else(|err| {
            log_error!(target: "checkpoints", "Listing checkpoints failed, what = {}", err);
            Vec::new()
        })
    }

    /// Adds every checkpoint listed in a JSON checkpoints file.
    pub fn load_new_checkpoints(&mut self, path: &Path) -> bool {
        let lines = match load_checkpoints_from_json(path) {
            Ok(lines) => lines,
            Err(err) => {
                log_error!(
                    target: "checkpoints",
                    "Error loading checkpoints from {}: {}",
                    path.display(),
                    err
                );
                return false;
            }
        };
        for line in &lines {
            let difficulty = line.difficulty.as_deref().unwrap_or("");
            if !self.add_checkpoint(line.height, &line.hash, difficulty) {
                return false;
            }
        }
        if !lines.is_empty() {
            log_info!(
                target: "checkpoints",
                "loaded {} checkpoints from {}",
                lines.len(),
                path.display()
            );
        }
        true
    }
}

/// Writes `checkpoint` inside a batch, joining one that is already open.
///
/// A record already at that height must carry the same hash; a matching
/// record is replaced, which lets later votes extend a service node checkpoint.
fn persist<S: CheckpointStore>(db: &S, checkpoint: &Checkpoint) -> bool {
    let batch_started = match db.batch_start() {
        Ok(started) => started,
        Err(err) => {
            log_error!(
                target: "checkpoints",
                "Failed to add checkpoint with hash: {} at height: {}, what = {}",
                hash_to_hex(&checkpoint.block_hash),
                checkpoint.height,
                err
            );
            return false;
        }
    };

    let written = match db.get_block_checkpoint(checkpoint.height) {
        Ok(Some(existing)) if existing.block_hash != checkpoint.block_hash => {
            log_error!(
                target: "checkpoints",
                "Checkpoint at height {} already pins hash {}, refusing {}",
                checkpoint.height,
                hash_to_hex(&existing.block_hash),
                hash_to_hex(&checkpoint.block_hash)
            );
            Ok(false)
        }
        Ok(_) => db.update_block_checkpoint(checkpoint).map(|()| true),
        Err(err) => Err(err),
    };
    let mut result = match written {
        Ok(written) => written,
        Err(err) => {
            log_error!(
                target: "checkpoints",
                "Failed to add checkpoint with hash: {} at height: {}, what = {}",
                hash_to_hex(&checkpoint.block_hash),
                checkpoint.height,
                err
            );
            false
        }
    };

    if batch_started {
        if let Err(err) = db.batch_stop() {
            log_error!(
                target: "checkpoints",
                "Committing checkpoint at height: {} failed, what = {}",
                checkpoint.height,
                err
            );
            result = false;
        }
    }
    result
}

/// Height and hash of the newest compiled-in checkpoint for `network`.
pub fn newest_hardcoded_checkpoint(network: Network) -> Option<(u64, Hash256)> {
    consensus_params(network).newest_seed()
}
