//! WebAssembly bindings for the stake kernel finder.
//!
//! This crate provides JavaScript-accessible APIs for:
//! - Fetching unspent output records from a lookup service
//! - Building kernel templates from those records
//! - Searching a time window for accepted kernels in batches

use wasm_bindgen::prelude::*;

pub mod api;
pub mod finder;
pub mod state;

// Re-export main types for JS access
pub use api::UnspentApi;
pub use finder::StakeFinder;

/// Initialize the WASM module with better panic messages.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Get the library version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Difficulty of a compact target.
#[wasm_bindgen]
pub fn bits_to_difficulty(bits: u32) -> f64 {
    stake_core::CompactTarget(bits).to_difficulty()
}

/// Compact target for a difficulty.
#[wasm_bindgen]
pub fn difficulty_to_bits(difficulty: f64) -> Result<u32, JsValue> {
    stake_core::CompactTarget::for_difficulty(difficulty)
        .map(|c| c.bits())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}
