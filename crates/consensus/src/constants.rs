//! Consensus-wide constants shared across validation.

/// Target spacing between blocks, in seconds.
pub const DIFFICULTY_TARGET_SECONDS: u64 = 120;
/// Number of blocks the difficulty is computed over.
pub const DIFFICULTY_WINDOW: usize = 60;
/// Samples trimmed from each end of the sorted window by the median-cut algorithm.
pub const DIFFICULTY_CUT: usize = 6;
/// Block-time samples kept around to compute the next difficulty.
pub const DIFFICULTY_BLOCKS_COUNT: usize = DIFFICULTY_WINDOW + 1;
/// Emergency ceiling multiplier applied by LWMA.
pub const DIFFICULTY_MAX_MULTIPLIER: u64 = 100_000;

const _: () = assert!(DIFFICULTY_WINDOW >= 2);
const _: () = assert!(2 * DIFFICULTY_CUT <= DIFFICULTY_WINDOW - 2);

/// Service node checkpoints are produced on this height grid.
pub const CHECKPOINT_INTERVAL: u64 = 4;
/// Checkpoints on this grid are never culled.
pub const CHECKPOINT_STORE_PERSISTENTLY_INTERVAL: u64 = 60;
/// Service node checkpoints required before the older one becomes immutable.
pub const CHECKPOINT_NUM_CHECKPOINTS_FOR_CHAIN_FINALITY: usize = 2;

const _: () = assert!(CHECKPOINT_STORE_PERSISTENTLY_INTERVAL % CHECKPOINT_INTERVAL == 0);

/// Upper bound on checkpoints returned by an unbounded range query.
pub const MAX_CHECKPOINTS_QUERY: usize = 256;
