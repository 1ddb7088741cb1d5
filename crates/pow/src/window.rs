//! Rolling block-time samples for the chain tip.

use std::collections::VecDeque;
use std::fmt;

use sispopd_consensus::constants::DIFFICULTY_BLOCKS_COUNT;

use crate::difficulty::next_difficulty_for_version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    NonContiguous { expected: u64, got: u64 },
    DifficultyDecreased { height: u64 },
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowError::NonContiguous { expected, got } => {
                write!(f, "expected sample for height {expected}, got {got}")
            }
            WindowError::DifficultyDecreased { height } => {
                write!(f, "cumulative difficulty decreases at height {height}")
            }
        }
    }
}

impl std::error::Error for WindowError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Sample {
    height: u64,
    timestamp: u64,
    cumulative_difficulty: u128,
}

/// The last [`DIFFICULTY_BLOCKS_COUNT`] `(timestamp, cumulative difficulty)`
/// samples of the active chain, ordered by height.
#[derive(Clone, Debug, Default)]
pub struct DifficultyCache {
    samples: VecDeque<Sample>,
}

impl DifficultyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        height: u64,
        timestamp: u64,
        cumulative_difficulty: u128,
    ) -> Result<(), WindowError> {
        if let Some(tip) = self.samples.back() {
            let expected = tip.height.saturating_add(1);
            if height != expected {
                return Err(WindowError::NonContiguous {
                    expected,
                    got: height,
                });
            }
            if cumulative_difficulty < tip.cumulative_difficulty {
                return Err(WindowError::DifficultyDecreased { height });
            }
        }
        self.samples.push_back(Sample {
            height,
            timestamp,
            cumulative_difficulty,
        });
        while self.samples.len() > DIFFICULTY_BLOCKS_COUNT {
            self.samples.pop_front();
        }
        Ok(())
    }

    /// Drops every sample above `height`.
    pub fn truncate_above(&mut self, height: u64) {
        let before = self.samples.len();
        while self
            .samples
            .back()
            .is_some_and(|sample| sample.height > height)
        {
            self.samples.pop_back();
        }
        let dropped = before - self.samples.len();
        if dropped > 0 {
            sispopd_log::log_debug!(
                target: "difficulty",
                "dropped {} cached block times above height {}",
                dropped,
                height
            );
        }
    }

    /// Difficulty required for the block after the cached tip.
    pub fn next_difficulty(&self, version: u8, target_seconds: u64) -> u128 {
        let (timestamps, cumulative): (Vec<u64>, Vec<u128>) = self
            .samples
            .iter()
            .map(|sample| (sample.timestamp, sample.cumulative_difficulty))
            .unzip();
        next_difficulty_for_version(version, &timestamps, &cumulative, target_seconds)
    }

    pub fn tip_height(&self) -> Option<u64> {
        self.samples.back().map(|sample| sample.height)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(count: u64) -> DifficultyCache {
        let mut cache = DifficultyCache::new();
        for height in 0..count {
            cache
                .push(height, 1_000 + height * 120, u128::from(height + 1) * 500)
                .expect("push");
        }
        cache
    }

    #[test]
    fn keeps_bounded_window() {
        let cache = filled(200);
        assert_eq!(cache.len(), DIFFICULTY_BLOCKS_COUNT);
        assert_eq!(cache.tip_height(), Some(199));
        assert_eq!(cache.next_difficulty(7, 120), 500);
    }

    #[test]
    fn rejects_gaps_and_decreasing_work() {
        let mut cache = filled(3);
        assert_eq!(
            cache.push(5, 0, 10_000),
            Err(WindowError::NonContiguous {
                expected: 3,
                got: 5
            })
        );
        assert_eq!(
            cache.push(3, 0, 1),
            Err(WindowError::DifficultyDecreased { height: 3 })
        );
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn reorg_truncates_and_resumes() {
        let mut cache = filled(10);
        cache.truncate_above(6);
        assert_eq!(cache.tip_height(), Some(6));
        assert_eq!(cache.len(), 7);
        cache.push(7, 2_000, 4_000).expect("push after reorg");
        cache.truncate_above(100);
        assert_eq!(cache.tip_height(), Some(7));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.next_difficulty(15, 120), 1);
        cache.push(42, 0, 0).expect("any height starts an empty cache");
    }
}
