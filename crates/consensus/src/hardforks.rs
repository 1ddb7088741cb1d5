//! Hard-fork schedules and height-to-version lookups.

use std::fmt;

use crate::params::Network;

pub const NETWORK_VERSION_FLOOR: u8 = 7;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum NetworkVersion {
    V7 = 7,
    V8 = 8,
    V9ServiceNodes = 9,
    V10Bulletproofs = 10,
    V11InfiniteStaking = 11,
    V12Checkpointing = 12,
    V13EnforceCheckpoints = 13,
    V14Blink = 14,
    V15Lns = 15,
    V16 = 16,
    V17 = 17,
    V18 = 18,
}

impl NetworkVersion {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HardFork {
    pub version: u8,
    pub snode_revision: u8,
    pub height: u64,
    pub time: u64,
}

impl HardFork {
    pub const fn new(version: u8, snode_revision: u8, height: u64, time: u64) -> Self {
        Self {
            version,
            snode_revision,
            height,
            time,
        }
    }
}

pub const MAINNET_HARD_FORKS: [HardFork; 9] = [
    HardFork::new(7, 0, 0, 1_503_046_577),
    HardFork::new(8, 0, 100, 1_692_426_487),
    HardFork::new(9, 0, 102, 1_692_426_900),
    HardFork::new(10, 0, 110, 1_692_427_080),
    HardFork::new(11, 0, 118, 1_692_427_200),
    HardFork::new(12, 0, 120, 1_692_427_260),
    HardFork::new(13, 0, 125, 1_692_427_500),
    HardFork::new(14, 0, 128, 1_692_427_620),
    HardFork::new(15, 0, 130, 1_692_427_740),
];

pub const TESTNET_HARD_FORKS: [HardFork; 13] = [
    HardFork::new(7, 0, 0, 1_533_631_121),
    HardFork::new(8, 0, 2, 1_533_631_122),
    HardFork::new(9, 0, 3, 1_533_631_123),
    HardFork::new(10, 0, 4, 1_542_681_077),
    HardFork::new(11, 0, 5, 1_551_223_964),
    HardFork::new(12, 0, 75_471, 1_561_608_000),
    HardFork::new(13, 0, 127_028, 1_568_440_800),
    HardFork::new(14, 0, 174_630, 1_575_075_600),
    HardFork::new(15, 0, 244_777, 1_583_940_000),
    HardFork::new(16, 0, 382_222, 1_600_468_200),
    HardFork::new(17, 0, 447_275, 1_608_276_840),
    HardFork::new(18, 0, 501_750, 1_616_631_051),
    HardFork::new(18, 1, 578_637, 1_624_040_400),
];

pub const DEVNET_HARD_FORKS: [HardFork; 6] = [
    HardFork::new(7, 0, 0, 1_599_848_400),
    HardFork::new(11, 0, 2, 1_599_848_400),
    HardFork::new(12, 0, 3, 1_599_848_400),
    HardFork::new(13, 0, 4, 1_599_848_400),
    HardFork::new(15, 0, 5, 1_599_848_400),
    HardFork::new(16, 0, 99, 1_599_848_400),
];

const _: () = assert!(
    is_ordered(&MAINNET_HARD_FORKS),
    "mainnet hard forks must start at v7 with strictly increasing versions and heights"
);
const _: () = assert!(
    is_ordered(&TESTNET_HARD_FORKS),
    "testnet hard forks must start at v7 with strictly increasing versions and heights"
);
const _: () = assert!(
    is_ordered(&DEVNET_HARD_FORKS),
    "devnet hard forks must start at v7 with strictly increasing versions and heights"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardForkError {
    Empty,
    BelowFloor { version: u8 },
    VersionNotIncreasing { index: usize },
    HeightNotIncreasing { index: usize },
    TimeDecreasing { index: usize },
}

impl fmt::Display for HardForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardForkError::Empty => write!(f, "hard fork table is empty"),
            HardForkError::BelowFloor { version } => write!(
                f,
                "first hard fork version {version} is below the v{NETWORK_VERSION_FLOOR} floor"
            ),
            HardForkError::VersionNotIncreasing { index } => write!(
                f,
                "hard fork {index}: (version, revision) must strictly increase"
            ),
            HardForkError::HeightNotIncreasing { index } => {
                write!(f, "hard fork {index}: height must strictly increase")
            }
            HardForkError::TimeDecreasing { index } => {
                write!(f, "hard fork {index}: time must not decrease")
            }
        }
    }
}

impl std::error::Error for HardForkError {}

/// Compile-time form of [`validate_hard_forks`].
pub const fn is_ordered(forks: &[HardFork]) -> bool {
    if forks.is_empty() || forks[0].version < NETWORK_VERSION_FLOOR {
        return false;
    }
    let mut idx = 1;
    while idx < forks.len() {
        let hf = forks[idx];
        let prev = forks[idx - 1];
        let version_increases = hf.version > prev.version
            || (hf.version == prev.version && hf.snode_revision > prev.snode_revision);
        if !version_increases || hf.height <= prev.height || hf.time < prev.time {
            return false;
        }
        idx += 1;
    }
    true
}

pub fn validate_hard_forks(forks: &[HardFork]) -> Result<(), HardForkError> {
    let first = forks.first().ok_or(HardForkError::Empty)?;
    if first.version < NETWORK_VERSION_FLOOR {
        return Err(HardForkError::BelowFloor {
            version: first.version,
        });
    }
    for (offset, pair) in forks.windows(2).enumerate() {
        let (prev, hf) = (&pair[0], &pair[1]);
        let index = offset + 1;
        if (hf.version, hf.snode_revision) <= (prev.version, prev.snode_revision) {
            return Err(HardForkError::VersionNotIncreasing { index });
        }
        if hf.height <= prev.height {
            return Err(HardForkError::HeightNotIncreasing { index });
        }
        if hf.time < prev.time {
            return Err(HardForkError::TimeDecreasing { index });
        }
    }
    Ok(())
}

// Fakechain tables come from `fakechain_params`.
pub fn hard_forks(network: Network) -> &'static [HardFork] {
    match network {
        Network::Mainnet => &MAINNET_HARD_FORKS,
        Network::Testnet => &TESTNET_HARD_FORKS,
        Network::Devnet => &DEVNET_HARD_FORKS,
        Network::Fakechain => &[],
    }
}

pub fn active_version_and_revision(forks: &[HardFork], height: u64) -> (u8, u8) {
    let mut result = (NETWORK_VERSION_FLOOR, 0);
    for hf in forks {
        if hf.height > height {
            break;
        }
        result = (hf.version, hf.snode_revision);
    }
    result
}

pub fn network_version(forks: &[HardFork], height: u64) -> u8 {
    active_version_and_revision(forks, height).0
}

pub fn is_hard_fork_at_least(forks: &[HardFork], version: u8, height: u64) -> bool {
    network_version(forks, height) >= version
}

pub fn hard_fork_ceil(forks: &[HardFork], version: u8) -> u8 {
    forks
        .iter()
        .map(|hf| hf.version)
        .find(|candidate| *candidate >= version)
        .unwrap_or(version)
}

/// First and last height at which `version` is active. The last is `None` while current.
pub fn height_range_for_version(forks: &[HardFork], version: u8) -> (Option<u64>, Option<u64>) {
    let mut found = (None, None);
    for hf in forks {
        if hf.version > version {
            if found.0.is_some() {
                found.1 = Some(hf.height - 1);
            }
            break;
        }
        // Revision bumps share the major version; keep the earliest height.
        if hf.version == version && found.0.is_none() {
            found.0 = Some(hf.height);
        }
    }
    found
}

pub fn ideal_version(forks: &[HardFork], height: u64) -> (u8, u8) {
    let mut result = (NETWORK_VERSION_FLOOR, NETWORK_VERSION_FLOOR);
    for hf in forks {
        if hf.height <= height {
            result.0 = hf.version;
        }
        result.1 = hf.version;
    }
    result
}
