//! Search state reported to JavaScript.

use serde::{Deserialize, Serialize};
use stake_core::{format_difficulty, KernelHit};
use wasm_bindgen::prelude::*;

/// Search statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinderStats {
    /// Candidate times checked.
    pub total_checked: u64,
    /// Current check rate (checks per second).
    pub check_rate: f64,
    /// Number of accepted kernels found.
    pub hits_found: u32,
    /// Next candidate time, if the window is not exhausted.
    pub position: Option<u32>,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: f64,
    /// Lowest kernel hash found (hex).
    pub best_hash: Option<String>,
    /// Significant bits of the best hash.
    pub best_hash_bits: u32,
}

impl FinderStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update check rate based on elapsed time.
    pub fn update_check_rate(&mut self) {
        if self.elapsed_ms > 0.0 {
            self.check_rate = (self.total_checked as f64) / (self.elapsed_ms / 1000.0);
        }
    }

    /// Format check rate for display.
    pub fn format_check_rate(&self) -> String {
        if self.check_rate >= 1_000_000.0 {
            format!("{:.2} M/s", self.check_rate / 1_000_000.0)
        } else if self.check_rate >= 1_000.0 {
            format!("{:.2} K/s", self.check_rate / 1_000.0)
        } else {
            format!("{:.2} /s", self.check_rate)
        }
    }

    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

/// Search setup for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    /// Compact target searched against.
    pub bits: u32,
    /// Difficulty of `bits`.
    pub difficulty: f64,
    /// Formatted difficulty string.
    pub difficulty_display: String,
    /// Staked value in coins.
    pub value_coins: f64,
    /// Whether the v0.3 kernel layout is used.
    pub is_protocol_v03: bool,
    /// First candidate time.
    pub window_from: u32,
    /// Last candidate time.
    pub window_to: u32,
    /// Network name.
    pub network: String,
}

impl TemplateInfo {
    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

/// One accepted kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitInfo {
    /// Accepted candidate time.
    pub tx_time: u32,
    /// Kernel hash (hex).
    pub kernel_hash: String,
    /// Significant bits of the kernel hash.
    pub hash_bits: u32,
    /// Highest difficulty at which the kernel still passes.
    pub max_difficulty: Option<f64>,
    /// Formatted maximum difficulty.
    pub max_difficulty_display: Option<String>,
}

impl From<&KernelHit> for HitInfo {
    fn from(hit: &KernelHit) -> Self {
        HitInfo {
            tx_time: hit.tx_time as u32,
            kernel_hash: hex::encode(hit.kernel_hash),
            hash_bits: hit.hash_bits,
            max_difficulty: hit.max_difficulty,
            max_difficulty_display: hit.max_difficulty.map(format_difficulty),
        }
    }
}

/// Result of one search batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultInfo {
    /// Kernels accepted in this batch.
    pub hits: Vec<HitInfo>,
    /// Candidate times checked in this batch.
    pub checked: u64,
    /// Whether the window is exhausted.
    pub finished: bool,
}

impl BatchResultInfo {
    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {:?}", e)))
}
