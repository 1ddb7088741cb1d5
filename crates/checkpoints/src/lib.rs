//! Checkpoint records, their block-store adapter, and the checkpoint ledger.

pub mod checkpoint;
pub mod json;
pub mod ledger;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointKind, DecodeError, VoterSignature};
pub use json::{load_checkpoints_from_json, HashLine, JsonError};
pub use ledger::{newest_hardcoded_checkpoint, AddedBlock, AltBlockCheck, BlockCheck, Checkpoints};
pub use store::{CheckpointStore, KvCheckpointStore, ReadTxn, WriteTxn};
