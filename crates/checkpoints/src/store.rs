//! Block-store side of the checkpoint ledger.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sispopd_consensus::constants::CHECKPOINT_NUM_CHECKPOINTS_FOR_CHAIN_FINALITY;
use sispopd_storage::{Column, KeyValueStore, StoreError, WriteBatch, WriteOp};

use crate::checkpoint::{checkpoint_key, height_from_key, Checkpoint};

/// Writes between `batch_start` and `batch_stop` land atomically.
pub trait CheckpointStore {
    fn get_block_checkpoint(&self, height: u64) -> Result<Option<Checkpoint>, StoreError>;
    fn update_block_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
    fn remove_block_checkpoint(&self, height: u64) -> Result<(), StoreError>;
    fn get_top_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError>;
    /// Checkpoints between `start` and `end` inclusive, walking downward when
    /// `start > end`, at most `max_count` of them.
    fn get_checkpoints_range(
        &self,
        start: u64,
        end: u64,
        max_count: usize,
    ) -> Result<Vec<Checkpoint>, StoreError>;

    /// Returns `true` when this call opened the batch.
    fn batch_start(&self) -> Result<bool, StoreError>;
    fn batch_stop(&self) -> Result<(), StoreError>;
    fn batch_abort(&self);
    fn is_read_only(&self) -> bool;
    fn txn_lock(&self) -> &RwLock<()>;

    // A hardcoded checkpoint is final by itself. A service node checkpoint
    // only finalises the checkpoint beneath it.
    fn get_immutable_checkpoint(&self, height: u64) -> Result<Option<Checkpoint>, StoreError> {
        let mut recent =
            self.get_checkpoints_range(height, 0, CHECKPOINT_NUM_CHECKPOINTS_FOR_CHAIN_FINALITY)?;
        if recent.first().is_some_and(|newest| !newest.is_service_node()) {
            return Ok(recent.into_iter().next());
        }
        if recent.len() == CHECKPOINT_NUM_CHECKPOINTS_FOR_CHAIN_FINALITY {
            return Ok(recent.pop());
        }
        Ok(None)
    }

    fn read_txn(&self) -> Result<ReadTxn<'_>, StoreError> {
        let guard = self
            .txn_lock()
            .read()
            .map_err(|_| StoreError::Backend("checkpoint txn lock poisoned".to_string()))?;
        Ok(ReadTxn { _guard: guard })
    }

    fn write_txn(&self) -> Result<WriteTxn<'_, Self>, StoreError>
    where
        Self: Sized,
    {
        let guard = self
            .txn_lock()
            .write()
            .map_err(|_| StoreError::Backend("checkpoint txn lock poisoned".to_string()))?;
        let started_batch = self.batch_start()?;
        Ok(WriteTxn {
            store: self,
            started_batch,
            aborted: false,
            _guard: guard,
        })
    }
}

pub struct ReadTxn<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive write access. Commits the batch it opened when dropped unless aborted.
pub struct WriteTxn<'a, S: CheckpointStore> {
    store: &'a S,
    started_batch: bool,
    aborted: bool,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl<S: CheckpointStore> WriteTxn<'_, S> {
    pub fn abort(mut self) {
        self.aborted = true;
    }
}

impl<S: CheckpointStore> Drop for WriteTxn<'_, S> {
    fn drop(&mut self) {
        if !self.started_batch {
            return;
        }
        if self.aborted {
            self.store.batch_abort();
            return;
        }
        if let Err(err) = self.store.batch_stop() {
            sispopd_log::log_error!(target: "checkpoints", "checkpoint batch commit failed: {err}");
        }
    }
}

pub struct KvCheckpointStore<S> {
    store: S,
    read_only: bool,
    heights: RwLock<BTreeSet<u64>>,
    pending: Mutex<Option<WriteBatch>>,
    txn_lock: RwLock<()>,
}

impl<S: KeyValueStore> KvCheckpointStore<S> {
    pub fn open(store: S) -> Result<Self, StoreError> {
        Self::open_with_mode(store, false)
    }

    pub fn read_only(store: S) -> Result<Self, StoreError> {
        Self::open_with_mode(store, true)
    }

    fn open_with_mode(store: S, read_only: bool) -> Result<Self, StoreError> {
        let mut heights = BTreeSet::new();
        store.for_each_prefix(Column::Checkpoint, &[], &mut |key, _| {
            let height = height_from_key(key)
                .ok_or_else(|| StoreError::Corrupt(format!("bad checkpoint key length {}", key.len())))?;
            heights.insert(height);
            Ok(())
        })?;
        Ok(Self {
            store,
            read_only,
            heights: RwLock::new(heights),
            pending: Mutex::new(None),
            txn_lock: RwLock::new(()),
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.with_heights(|heights| heights.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn pending(&self) -> Result<MutexGuard<'_, Option<WriteBatch>>, StoreError> {
        self.pending
            .lock()
            .map_err(|_| StoreError::Backend("checkpoint batch lock poisoned".to_string()))
    }

    fn committed(&self) -> Result<RwLockReadGuard<'_, BTreeSet<u64>>, StoreError> {
        self.heights
            .read()
            .map_err(|_| StoreError::Backend("checkpoint height index poisoned".to_string()))
    }

    fn committed_mut(&self) -> Result<RwLockWriteGuard<'_, BTreeSet<u64>>, StoreError> {
        self.heights
            .write()
            .map_err(|_| StoreError::Backend("checkpoint height index poisoned".to_string()))
    }

    /// Runs `f` over committed heights with any buffered batch applied on top.
    fn with_heights<R>(&self, f: impl FnOnce(&BTreeSet<u64>) -> R) -> Result<R, StoreError> {
        let pending = self.pending()?;
        let committed = self.committed()?;
        match pending.as_ref().filter(|batch| !batch.is_empty()) {
            None => Ok(f(&committed)),
            Some(batch) => {
                let mut view = committed.clone();
                apply_ops(&mut view, batch.iter());
                Ok(f(&view))
            }
        }
    }

    fn write(&self, op: WriteOp) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut pending = self.pending()?;
        if let Some(batch) = pending.as_mut() {
            match op {
                WriteOp::Put { column, key, value } => batch.put(column, key, value),
                WriteOp::Delete { column, key } => batch.delete(column, key),
            }
            return Ok(());
        }
        match &op {
            WriteOp::Put { column, key, value } => {
                self.store.put(*column, key.as_slice(), value.as_slice())?
            }
            WriteOp::Delete { column, key } => self.store.delete(*column, key.as_slice())?,
        }
        apply_ops(&mut *self.committed_mut()?, std::iter::once(&op));
        Ok(())
    }
}

fn apply_ops<'a>(heights: &mut BTreeSet<u64>, ops: impl Iterator<Item = &'a WriteOp>) {
    for op in ops {
        let Some(height) = height_from_key(op.key()) else {
            continue;
        };
        match op {
            WriteOp::Put { .. } => {
                heights.insert(height);
            }
            WriteOp::Delete { .. } => {
                heights.remove(&height);
            }
        }
    }
}

impl<S: KeyValueStore> CheckpointStore for KvCheckpointStore<S> {
    fn get_block_checkpoint(&self, height: u64) -> Result<Option<Checkpoint>, StoreError> {
        let key = checkpoint_key(height);
        let buffered = {
            let pending = self.pending()?;
            pending
                .as_ref()
                .and_then(|batch| batch.pending(Column::Checkpoint, &key))
                .map(|value| value.map(<[u8]>::to_vec))
        };
        let bytes = match buffered {
            Some(value) => value,
            None => self.store.get(Column::Checkpoint, &key)?,
        };
        match bytes {
            Some(bytes) => Ok(Some(Checkpoint::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_block_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.write(WriteOp::Put {
            column: Column::Checkpoint,
            key: checkpoint_key(checkpoint.height).into(),
            value: checkpoint.encode().into(),
        })
    }

    fn remove_block_checkpoint(&self, height: u64) -> Result<(), StoreError> {
        self.write(WriteOp::Delete {
            column: Column::Checkpoint,
            key: checkpoint_key(height).into(),
        })
    }

    fn get_top_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        match self.with_heights(|heights| heights.last().copied())? {
            Some(height) => self.get_block_checkpoint(height),
            None => Ok(None),
        }
    }

    fn get_checkpoints_range(
        &self,
        start: u64,
        end: u64,
        max_count: usize,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        let heights: Vec<u64> = self.with_heights(|heights| {
            if start <= end {
                heights
                    .range((Bound::Included(start), Bound::Included(end)))
                    .take(max_count)
                    .copied()
                    .collect()
            } else {
                heights
                    .range((Bound::Included(end), Bound::Included(start)))
                    .rev()
                    .take(max_count)
                    .copied()
                    .collect()
            }
        })?;

        let mut result = Vec::with_capacity(heights.len());
        for height in heights {
            if let Some(checkpoint) = self.get_block_checkpoint(height)? {
                result.push(checkpoint);
            }
        }
        Ok(result)
    }

    fn batch_start(&self) -> Result<bool, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut pending = self.pending()?;
        if pending.is_some() {
            return Ok(false);
        }
        *pending = Some(WriteBatch::new());
        Ok(true)
    }

    fn batch_stop(&self) -> Result<(), StoreError> {
        let mut pending = self.pending()?;
        let Some(batch) = pending.take() else {
            return Err(StoreError::Backend("no checkpoint batch in progress".to_string()));
        };
        self.store.write_batch(&batch)?;
        apply_ops(&mut *self.committed_mut()?, batch.iter());
        Ok(())
    }

    fn batch_abort(&self) {
        if let Ok(mut pending) = self.pending() {
            pending.take();
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn txn_lock(&self) -> &RwLock<()> {
        &self.txn_lock
    }
}
