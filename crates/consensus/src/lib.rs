//! Consensus constants, parameters, and hard-fork schedule.

pub mod constants;
pub mod hardforks;
pub mod params;

pub type Hash256 = [u8; 32];

pub use hardforks::{
    active_version_and_revision, hard_fork_ceil, hard_forks, height_range_for_version,
    ideal_version, is_hard_fork_at_least, network_version, validate_hard_forks, HardFork,
    HardForkError, NetworkVersion, NETWORK_VERSION_FLOOR,
};
pub use params::{
    consensus_params, difficulty_from_hex, fakechain_params, hash_from_hex, hash_to_hex,
    CheckpointSeed, ConsensusParams, HexError, Network, MAINNET_CHECKPOINTS,
};
