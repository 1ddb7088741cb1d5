//! Checkpoint records and their on-disk encoding.

use std::fmt;

use sispopd_consensus::{hash_to_hex, Hash256};
use sispopd_storage::StoreError;

const HEADER_LEN: usize = 8 + 32 + 1 + 4;
const SIGNATURE_ENTRY_LEN: usize = 2 + 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CheckpointKind {
    Hardcoded = 0,
    ServiceNode = 1,
}

impl CheckpointKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CheckpointKind::Hardcoded),
            1 => Some(CheckpointKind::ServiceNode),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointKind::Hardcoded => "hardcoded",
            CheckpointKind::ServiceNode => "service_node",
        }
    }
}

/// A quorum member's signature over the checkpointed block hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VoterSignature {
    pub voter_index: u16,
    pub signature: [u8; 64],
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: Hash256,
    pub kind: CheckpointKind,
    pub signatures: Vec<VoterSignature>,
}

impl Checkpoint {
    pub fn hardcoded(height: u64, block_hash: Hash256) -> Self {
        Self {
            height,
            block_hash,
            kind: CheckpointKind::Hardcoded,
            signatures: Vec::new(),
        }
    }

    pub fn service_node(height: u64, block_hash: Hash256, signatures: Vec<VoterSignature>) -> Self {
        Self {
            height,
            block_hash,
            kind: CheckpointKind::ServiceNode,
            signatures,
        }
    }

    pub fn is_service_node(&self) -> bool {
        self.kind == CheckpointKind::ServiceNode
    }

    /// Compares `hash` against the pinned hash and logs the outcome.
    pub fn check(&self, hash: &Hash256) -> bool {
        let passed = self.block_hash == *hash;
        if passed {
            sispopd_log::log_info!(
                target: "checkpoints",
                "CHECKPOINT PASSED FOR HEIGHT {} {}",
                self.height,
                hash_to_hex(&self.block_hash)
            );
        } else {
            sispopd_log::log_warn!(
                target: "checkpoints",
                "CHECKPOINT FAILED FOR HEIGHT {}. EXPECTED HASH {} GIVEN HASH: {}",
                self.height,
                hash_to_hex(&self.block_hash),
                hash_to_hex(hash)
            );
        }
        passed
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.signatures.len() * SIGNATURE_ENTRY_LEN);
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.block_hash);
        out.push(self.kind as u8);
        out.extend_from_slice(&(self.signatures.len() as u32).to_le_bytes());
        for vote in &self.signatures {
            out.extend_from_slice(&vote.voter_index.to_le_bytes());
            out.extend_from_slice(&vote.signature);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated);
        }
        let height = u64::from_le_bytes(take(&bytes[0..8])?);
        let block_hash: Hash256 = take(&bytes[8..40])?;
        let kind = CheckpointKind::from_u8(bytes[40]).ok_or(DecodeError::UnknownKind(bytes[40]))?;
        let count = u32::from_le_bytes(take(&bytes[41..45])?) as usize;

        let body = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(SIGNATURE_ENTRY_LEN)
            .ok_or(DecodeError::Truncated)?;
        if body.len() < expected {
            return Err(DecodeError::Truncated);
        }
        if body.len() > expected {
            return Err(DecodeError::TrailingBytes(body.len() - expected));
        }

        let mut signatures = Vec::with_capacity(count);
        for entry in body.chunks_exact(SIGNATURE_ENTRY_LEN) {
            signatures.push(VoterSignature {
                voter_index: u16::from_le_bytes(take(&entry[0..2])?),
                signature: take(&entry[2..])?,
            });
        }

        Ok(Self {
            height,
            block_hash,
            kind,
            signatures,
        })
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| DecodeError::Truncated)
}

/// Store key for a checkpoint; big-endian so key order is height order.
pub fn checkpoint_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

pub fn height_from_key(key: &[u8]) -> Option<u64> {
    key.try_into().ok().map(u64::from_be_bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    UnknownKind(u8),
    TrailingBytes(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "checkpoint record is truncated"),
            DecodeError::UnknownKind(kind) => write!(f, "unknown checkpoint kind {kind}"),
            DecodeError::TrailingBytes(extra) => {
                write!(f, "checkpoint record has {extra} trailing bytes")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for StoreError {
    fn from(err: DecodeError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}
