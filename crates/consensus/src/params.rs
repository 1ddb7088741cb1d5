//! Consensus parameter definitions.

use std::fmt;

use crate::constants::{
    CHECKPOINT_INTERVAL, CHECKPOINT_NUM_CHECKPOINTS_FOR_CHAIN_FINALITY,
    CHECKPOINT_STORE_PERSISTENTLY_INTERVAL, DIFFICULTY_CUT, DIFFICULTY_TARGET_SECONDS,
    DIFFICULTY_WINDOW,
};
use crate::hardforks::{self, hard_forks, validate_hard_forks, HardFork, HardForkError};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
    /// Private test network whose fork table is supplied at runtime.
    Fakechain,
}

impl Network {
    pub const ALL: [Network; 4] = [
        Network::Mainnet,
        Network::Testnet,
        Network::Devnet,
        Network::Fakechain,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
            Network::Fakechain => "fakechain",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            "devnet" | "dev" => Some(Network::Devnet),
            "fakechain" | "regtest" => Some(Network::Fakechain),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled-in `(height, block hash, cumulative difficulty)` triple.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CheckpointSeed {
    pub height: u64,
    pub hash: &'static str,
    pub difficulty: &'static str,
}

const fn seed(height: u64, hash: &'static str, difficulty: &'static str) -> CheckpointSeed {
    CheckpointSeed {
        height,
        hash,
        difficulty,
    }
}

pub const MAINNET_CHECKPOINTS: [CheckpointSeed; 21] = [
    seed(
        0,
        "8cc33ab439f5fec5a384321b872c25686d2ab9d688e715ee3087b20094fccd47",
        "0x1",
    ),
    seed(
        5_000,
        "1e9c86f2519c8c1253fea3f285c301df7f12258892aa9fb24c0d6c0725054f58",
        "0xbcc26d0716",
    ),
    seed(
        10_000,
        "9358546b6e50f0f203b344ef95f8cf9f756c409292c8abfd747af98118dc0b21",
        "0x1bb4dd4a419",
    ),
    seed(
        15_000,
        "1eb3f2e40efe39d766fe8ddcf6c7b7efc0fe09d7919cef7de62717f38a6f3ee2",
        "0x2ab693df687",
    ),
    seed(
        20_000,
        "c9acfaf4a0bdb294e3627216b1ae4a2cc7cdac1e76401b5bf04f2146f4e25e96",
        "0x360cf01fba0",
    ),
    seed(
        25_000,
        "a92b53fb0dcd47a52ec51792cbe0ebce98dc205aab8022be4682b8d32b89467e",
        "0x40fa0c2d6e9",
    ),
    seed(
        30_000,
        "c4eafca18774525cd9711927e2de60b909cd39697cc8240b0a39134d9f20d0f4",
        "0x48689d310cf",
    ),
    seed(
        35_000,
        "071a097a3b9ae7e78d37b5d31953d46587d9b3a8b4f67d5c6753866780fb01ed",
        "0x503a761685b",
    ),
    seed(
        40_000,
        "eaae7dc6e109a05fd42e0d5f08294d9b6bf24d6a5b0566bfc0643e0cfba33543",
        "0x5790641ee5d",
    ),
    seed(
        45_000,
        "692b269204de714d702435a43790b63c20036c7269a86f2ac075aed21da99c34",
        "0x5e9511824af",
    ),
    seed(
        50_000,
        "aaf4eae74eb0960a111f39ebcd9ed242ead8ba764e95aee7c6584a1d61ee55fe",
        "0x658aae78d67",
    ),
    seed(
        55_000,
        "32df0bc894875581adc9dad51b76133d3d01a4f43c3b9e133a76a05c0a899e1b",
        "0x68c0bfa8409",
    ),
    seed(
        60_000,
        "e0430f775523011ac04a6dace295057cce86c0db5338d8ca4ba7dc95a927dca7",
        "0x85094481cbe",
    ),
    seed(
        65_000,
        "bcbe23a77309ffc5a203107cad094d3a2132e22b17c66db565463700b658a189",
        "0xcf80f71e09d",
    ),
    seed(
        70_000,
        "e40d906d5ec460c563a0ccdc50ca0fdbfd38c0ab8c59ab97e8865f2108d5a4c4",
        "0x11d927a6492d",
    ),
    seed(
        75_000,
        "0f326a6627e575ced8fce491000ce6eddb7f3b64edac45e0859a690a4a03d38c",
        "0x16301d48e8f5",
    ),
    seed(
        80_000,
        "d9b1fd754541cfdefbd8b52a46aba0df5cf9b70f60218723104e95561313223b",
        "0x197658ff1999",
    ),
    seed(
        85_000,
        "e14d12957a42d2abe84feac9f19c314847f40fd3e83d705b9f75470427876384",
        "0x1bbe2293bca2",
    ),
    seed(
        90_000,
        "084158da5562005ab785ef257dd670ec224abeeeebee7190be527551e47ece8d",
        "0x1ebf36558c61",
    ),
    seed(
        95_000,
        "553120c5015ea18285fec94bc2d9ae49e0c04395a1f12a62789b563f420ef15c",
        "0x21b78549b6e4",
    ),
    seed(
        99_704,
        "6a6d8fe601d6c0497b8dad268f0ca9efa17ae8d5ef269f070e6b626263513acc",
        "0x2480f7e86e50",
    ),
];

const fn seeds_ascending(seeds: &[CheckpointSeed]) -> bool {
    let mut idx = 1;
    while idx < seeds.len() {
        if seeds[idx].height <= seeds[idx - 1].height {
            return false;
        }
        idx += 1;
    }
    true
}

const _: () = assert!(
    seeds_ascending(&MAINNET_CHECKPOINTS),
    "mainnet seed checkpoints must be sorted by height"
);

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub target_seconds: u64,
    pub difficulty_window: usize,
    pub difficulty_cut: usize,
    pub checkpoint_interval: u64,
    pub checkpoint_store_persistently_interval: u64,
    pub checkpoint_finality_count: usize,
    pub hard_forks: Vec<HardFork>,
    pub checkpoints: &'static [CheckpointSeed],
}

impl ConsensusParams {
    pub fn active_version_and_revision(&self, height: u64) -> (u8, u8) {
        hardforks::active_version_and_revision(&self.hard_forks, height)
    }

    pub fn network_version(&self, height: u64) -> u8 {
        hardforks::network_version(&self.hard_forks, height)
    }

    pub fn is_hard_fork_at_least(&self, version: u8, height: u64) -> bool {
        hardforks::is_hard_fork_at_least(&self.hard_forks, version, height)
    }

    pub fn hard_fork_ceil(&self, version: u8) -> u8 {
        hardforks::hard_fork_ceil(&self.hard_forks, version)
    }

    pub fn height_range_for_version(&self, version: u8) -> (Option<u64>, Option<u64>) {
        hardforks::height_range_for_version(&self.hard_forks, version)
    }

    pub fn ideal_version(&self, height: u64) -> (u8, u8) {
        hardforks::ideal_version(&self.hard_forks, height)
    }

    /// Height and hash of the newest compiled-in checkpoint.
    pub fn newest_seed(&self) -> Option<(u64, Hash256)> {
        let last = self.checkpoints.last()?;
        let hash = hash_from_hex(last.hash).ok()?;
        Some((last.height, hash))
    }
}

fn base_params(network: Network) -> ConsensusParams {
    ConsensusParams {
        network,
        target_seconds: DIFFICULTY_TARGET_SECONDS,
        difficulty_window: DIFFICULTY_WINDOW,
        difficulty_cut: DIFFICULTY_CUT,
        checkpoint_interval: CHECKPOINT_INTERVAL,
        checkpoint_store_persistently_interval: CHECKPOINT_STORE_PERSISTENTLY_INTERVAL,
        checkpoint_finality_count: CHECKPOINT_NUM_CHECKPOINTS_FOR_CHAIN_FINALITY,
        hard_forks: hard_forks(network).to_vec(),
        checkpoints: &[],
    }
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet | Network::Devnet | Network::Fakechain => base_params(network),
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        checkpoints: &MAINNET_CHECKPOINTS,
        ..base_params(Network::Mainnet)
    }
}

/// Parameters for the private test network with a caller-supplied fork table.
pub fn fakechain_params(forks: Vec<HardFork>) -> Result<ConsensusParams, HardForkError> {
    validate_hard_forks(&forks)?;
    Ok(ConsensusParams {
        hard_forks: forks,
        ..base_params(Network::Fakechain)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
    Overflow,
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
            HexError::Overflow => write!(f, "hex value does not fit in 128 bits"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a 64-character block hash. Bytes keep the order they are written in.
pub fn hash_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    let raw = hex.as_bytes();
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let hi = hex_digit(raw[i * 2]).ok_or(HexError::InvalidHex)?;
        let lo = hex_digit(raw[i * 2 + 1]).ok_or(HexError::InvalidHex)?;
        *byte_out = (hi << 4) | lo;
    }
    Ok(bytes)
}

pub fn hash_to_hex(hash: &Hash256) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Parses a cumulative difficulty such as `0x2480f7e86e50`.
pub fn difficulty_from_hex(input: &str) -> Result<u128, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() {
        return Err(HexError::InvalidLength);
    }
    let mut value: u128 = 0;
    for digit in hex.bytes() {
        let nibble = hex_digit(digit).ok_or(HexError::InvalidHex)?;
        value = value
            .checked_mul(16)
            .and_then(|v| v.checked_add(u128::from(nibble)))
            .ok_or(HexError::Overflow)?;
    }
    Ok(value)
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parse_roundtrip() {
        for network in Network::ALL {
            assert_eq!(Network::parse(network.as_str()), Some(network));
        }
        assert_eq!(Network::parse(" Regtest "), Some(Network::Fakechain));
        assert_eq!(Network::parse("stagenet"), None);
    }

    #[test]
    fn seeds_parse() {
        for seed in MAINNET_CHECKPOINTS {
            let hash = hash_from_hex(seed.hash).expect("seed hash");
            assert_eq!(hash_to_hex(&hash), seed.hash);
            difficulty_from_hex(seed.difficulty).expect("seed difficulty");
        }
        let genesis = hash_from_hex(MAINNET_CHECKPOINTS[0].hash).expect("genesis");
        assert_eq!(genesis[0], 0x8c);
        assert_eq!(genesis[31], 0x47);
    }

    #[test]
    fn difficulty_hex_forms() {
        assert_eq!(difficulty_from_hex("0x1"), Ok(1));
        assert_eq!(difficulty_from_hex("ff"), Ok(255));
        assert_eq!(difficulty_from_hex("0X2480f7e86e50"), Ok(0x2480_f7e8_6e50));
        assert_eq!(difficulty_from_hex("0x"), Err(HexError::InvalidLength));
        assert_eq!(difficulty_from_hex("0xzz"), Err(HexError::InvalidHex));
        let too_wide = format!("0x1{}", "0".repeat(32));
        assert_eq!(difficulty_from_hex(&too_wide), Err(HexError::Overflow));
    }

    #[test]
    fn hash_hex_rejects_bad_input() {
        assert_eq!(hash_from_hex("00"), Err(HexError::InvalidLength));
        let bad = "g".repeat(64);
        assert_eq!(hash_from_hex(&bad), Err(HexError::InvalidHex));
    }

    #[test]
    fn params_per_network() {
        let main = consensus_params(Network::Mainnet);
        assert_eq!(main.checkpoints.len(), 21);
        assert_eq!(main.target_seconds, 120);
        assert_eq!(main.network_version(0), 7);
        assert_eq!(main.newest_seed().map(|(h, _)| h), Some(99_704));

        let test = consensus_params(Network::Testnet);
        assert!(test.checkpoints.is_empty());
        assert!(test.newest_seed().is_none());
        assert_eq!(test.hard_forks.len(), 13);
    }

    #[test]
    fn lookups_follow_own_network_table() {
        let main = consensus_params(Network::Mainnet);
        let test = consensus_params(Network::Testnet);
        assert_eq!(main.active_version_and_revision(1_000), (15, 0));
        assert_eq!(test.active_version_and_revision(1_000), (11, 0));
        assert_eq!(test.active_version_and_revision(578_637), (18, 1));

        assert!(main.is_hard_fork_at_least(12, 120));
        assert!(!test.is_hard_fork_at_least(12, 120));
        assert_eq!(main.hard_fork_ceil(16), 16);
        assert_eq!(test.hard_fork_ceil(16), 16);
        assert_eq!(main.hard_fork_ceil(14), 14);

        assert_eq!(main.height_range_for_version(12), (Some(120), Some(124)));
        assert_eq!(test.height_range_for_version(12), (Some(75_471), Some(127_027)));
        assert_eq!(test.height_range_for_version(18), (Some(501_750), None));

        assert_eq!(main.ideal_version(125), (13, 15));
        assert_eq!(test.ideal_version(125), (11, 18));
    }

    #[test]
    fn fakechain_table_is_validated() {
        let params = fakechain_params(vec![
            HardFork::new(7, 0, 0, 0),
            HardFork::new(12, 0, 10, 0),
        ])
        .expect("ordered table");
        assert_eq!(params.network, Network::Fakechain);
        assert_eq!(params.network_version(10), 12);

        let err = fakechain_params(vec![
            HardFork::new(12, 0, 0, 0),
            HardFork::new(7, 0, 10, 0),
        ])
        .unwrap_err();
        assert_eq!(err, HardForkError::VersionNotIncreasing { index: 1 });
    }
}
