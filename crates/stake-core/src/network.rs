//! Network definitions and kernel parameters.

use serde::{Deserialize, Serialize};

/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Smallest units per coin.
pub const COIN: i64 = 1_000_000;

/// Maximum age counted toward coin-day weight: 90 days.
pub const STAKE_MAX_AGE: i64 = 90 * SECONDS_PER_DAY;

/// Protocol v0.3 activation time on mainnet.
pub const PROTOCOL_V03_SWITCH_TIME: i64 = 1_363_800_000;

/// Protocol v0.3 activation time on testnet.
pub const PROTOCOL_V03_TEST_SWITCH_TIME: i64 = 1_359_781_000;

/// Staking network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Main network
    #[default]
    Mainnet,
    /// Test network
    Testnet,
}

impl Network {
    /// Kernel parameters for this network.
    pub fn params(&self) -> KernelParams {
        match self {
            Network::Mainnet => KernelParams {
                stake_min_age: 30 * SECONDS_PER_DAY,
                stake_max_age: STAKE_MAX_AGE,
                coin: COIN,
                protocol_v03_switch_time: PROTOCOL_V03_SWITCH_TIME,
            },
            Network::Testnet => KernelParams {
                stake_min_age: SECONDS_PER_DAY,
                stake_max_age: STAKE_MAX_AGE,
                coin: COIN,
                protocol_v03_switch_time: PROTOCOL_V03_TEST_SWITCH_TIME,
            },
        }
    }

    /// Get network name as string.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Parse network from string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" | "testnet3" => Some(Network::Testnet),
            _ => None,
        }
    }
}

impl core::fmt::Display for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Economic and protocol constants used by the kernel check.
///
/// These are plain values so several parameter sets can be used side by
/// side. Fields missing from a JSON document take their mainnet values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelParams {
    /// Minimum output age in seconds before it may stake.
    pub stake_min_age: i64,
    /// Age in seconds beyond which coin-day weight stops growing.
    pub stake_max_age: i64,
    /// Smallest units per coin.
    pub coin: i64,
    /// Time at which the v0.3 kernel serialization takes effect.
    pub protocol_v03_switch_time: i64,
}

impl KernelParams {
    /// Whether the v0.3 protocol is in force at `time`.
    pub fn is_protocol_v03(&self, time: i64) -> bool {
        time >= self.protocol_v03_switch_time
    }

    /// Smallest-unit seconds making up one coin-day.
    pub fn coin_day_seconds(&self) -> i64 {
        self.coin.saturating_mul(SECONDS_PER_DAY)
    }

    /// Load parameters from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for KernelParams {
    fn default() -> Self {
        Network::Mainnet.params()
    }
}
