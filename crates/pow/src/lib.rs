//! Difficulty retargeting and proof-of-work difficulty checks.

pub mod difficulty;
pub mod window;

pub use difficulty::{
    difficulty_algorithm, hash_meets_difficulty, next_difficulty, next_difficulty_for_version,
    next_difficulty_lwma, DifficultyAlgorithm,
};
pub use window::{DifficultyCache, WindowError};
