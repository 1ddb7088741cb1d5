//! Next-block difficulty and hash/difficulty checks.

use primitive_types::{U256, U512};
use sispopd_consensus::constants::{DIFFICULTY_CUT, DIFFICULTY_MAX_MULTIPLIER, DIFFICULTY_WINDOW};
use sispopd_consensus::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyAlgorithm {
    MedianCut,
    /// Negative solve times floored at `-7T`.
    LwmaLegacy,
    Lwma,
}

impl DifficultyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MedianCut => "median-cut",
            Self::LwmaLegacy => "lwma-legacy",
            Self::Lwma => "lwma",
        }
    }
}

pub fn difficulty_algorithm(version: u8) -> DifficultyAlgorithm {
    match version {
        0..=7 => DifficultyAlgorithm::MedianCut,
        8..=9 => DifficultyAlgorithm::LwmaLegacy,
        _ => DifficultyAlgorithm::Lwma,
    }
}

pub fn next_difficulty_for_version(
    version: u8,
    timestamps: &[u64],
    cumulative_difficulties: &[u128],
    target_seconds: u64,
) -> u128 {
    match difficulty_algorithm(version) {
        DifficultyAlgorithm::MedianCut => {
            next_difficulty(timestamps, cumulative_difficulties, target_seconds)
        }
        DifficultyAlgorithm::LwmaLegacy => {
            next_difficulty_lwma(timestamps, cumulative_difficulties, target_seconds, true)
        }
        DifficultyAlgorithm::Lwma => {
            next_difficulty_lwma(timestamps, cumulative_difficulties, target_seconds, false)
        }
    }
}

fn recent<'a>(
    timestamps: &'a [u64],
    cumulative_difficulties: &'a [u128],
    limit: usize,
) -> (&'a [u64], &'a [u128]) {
    let len = timestamps.len().min(cumulative_difficulties.len()).min(limit);
    (
        &timestamps[timestamps.len() - len..],
        &cumulative_difficulties[cumulative_difficulties.len() - len..],
    )
}

// Only the timestamps are sorted. Returns 0 when the result overflows 128 bits.
pub fn next_difficulty(
    timestamps: &[u64],
    cumulative_difficulties: &[u128],
    target_seconds: u64,
) -> u128 {
    let (timestamps, cumulative_difficulties) =
        recent(timestamps, cumulative_difficulties, DIFFICULTY_WINDOW);
    let length = timestamps.len();
    if length <= 1 {
        return 1;
    }

    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();

    let kept = DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT;
    let (cut_begin, cut_end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept + 1) / 2;
        (begin, begin + kept)
    };

    let mut time_span = sorted[cut_end - 1] - sorted[cut_begin];
    if time_span == 0 {
        time_span = 1;
    }
    let total_work =
        cumulative_difficulties[cut_end - 1].wrapping_sub(cumulative_difficulties[cut_begin]);

    let span = U256::from(time_span);
    let res = (U256::from(total_work) * U256::from(target_seconds) + span - U256::one()) / span;
    if res > U256::from(u128::MAX) {
        return 0;
    }
    res.as_u128()
}

pub fn next_difficulty_lwma(
    timestamps: &[u64],
    cumulative_difficulties: &[u128],
    target_seconds: u64,
    use_old_lwma: bool,
) -> u128 {
    let t = target_seconds as i64;
    let (timestamps, cumulative_difficulties) =
        recent(timestamps, cumulative_difficulties, DIFFICULTY_WINDOW);
    if timestamps.len() < 4 {
        return 1;
    }
    let n = timestamps.len() - 1;

    const ADJUST: f64 = 0.998;
    let k = (n * (n + 1) / 2) as f64;
    let max_solve_time = t.saturating_mul(7);

    let mut lwma = 0f64;
    let mut sum_inverse_d = 0f64;
    for i in 1..=n {
        let mut solve_time = (timestamps[i] as i64).wrapping_sub(timestamps[i - 1] as i64);
        if use_old_lwma {
            solve_time = solve_time.max(-max_solve_time);
        }
        solve_time = solve_time.min(max_solve_time);

        let difficulty = cumulative_difficulties[i].wrapping_sub(cumulative_difficulties[i - 1]);
        lwma += solve_time.wrapping_mul(i as i64) as f64 / k;
        sum_inverse_d += 1.0 / difficulty as f64;
    }

    let harmonic_mean_d = n as f64 / sum_inverse_d;

    if (lwma.round() as i64) < t / 20 {
        lwma = (t / 20) as f64;
    }

    let mut next = (harmonic_mean_d * t as f64 / lwma * ADJUST) as u64;
    if next == 0 {
        next = 1;
    }
    u128::from(next.min(DIFFICULTY_MAX_MULTIPLIER.saturating_mul(target_seconds)))
}

/// True when `hash`, read as a little-endian 256-bit integer, times
/// `difficulty` stays within 256 bits.
pub fn hash_meets_difficulty(hash: &Hash256, difficulty: u128) -> bool {
    let value = U512::from(U256::from_little_endian(hash));
    let product = value * U512::from(difficulty);
    product <= U512::from(U256::max_value())
}
