//! Kernel search controller for the WASM finder.

use stake_core::{
    format_difficulty, CompactTarget, HashOrder, KernelSearch, KernelTemplate, KernelValidator,
    Network, OutPoint, SearchWindow, TargetSpec, UtxoRecord,
};
use wasm_bindgen::prelude::*;

use crate::state::{BatchResultInfo, FinderStats, HitInfo, TemplateInfo};

/// The main search controller.
#[wasm_bindgen]
pub struct StakeFinder {
    /// The network whose parameters apply.
    network: Network,
    /// Validator for the network.
    validator: KernelValidator,
    /// Template for the staked output.
    template: KernelTemplate,
    /// Search in progress, if a window was set.
    search: Option<KernelSearch>,
    /// Search statistics.
    stats: FinderStats,
    /// Start time of searching.
    start_time: f64,
    /// Whether searching is active.
    is_searching: bool,
    /// Lowest kernel hash found so far.
    best_hash: Option<[u8; 32]>,
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_network(network: &str) -> Result<Network, JsValue> {
    Network::from_name(network).ok_or_else(|| JsValue::from_str("Invalid network"))
}

#[wasm_bindgen]
impl StakeFinder {
    /// Create a finder from a JSON kernel template.
    ///
    /// # Arguments
    /// * `template_json` - Template with PascalCase fields (`"BlockFromTime"`, ...)
    /// * `network` - The network ("mainnet" or "testnet")
    #[wasm_bindgen(constructor)]
    pub fn new(template_json: &str, network: &str) -> Result<StakeFinder, JsValue> {
        let net = parse_network(network)?;
        let template: KernelTemplate = serde_json::from_str(template_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid template: {}", e)))?;
        Ok(Self::with_template(net, template))
    }

    /// Create a finder for a stored output record.
    ///
    /// # Arguments
    /// * `record_json` - Output record as returned by `UnspentApi.get_utxo`
    /// * `outpoint` - The output as `txid:index`
    /// * `bits` - Compact target to search against
    /// * `from_time` - First candidate time
    /// * `network` - The network ("mainnet" or "testnet")
    #[wasm_bindgen(js_name = fromUtxo)]
    pub fn from_utxo(
        record_json: &str,
        outpoint: &str,
        bits: u32,
        from_time: u32,
        network: &str,
    ) -> Result<StakeFinder, JsValue> {
        let net = parse_network(network)?;
        let record: UtxoRecord = serde_json::from_str(record_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid utxo record: {}", e)))?;
        let outpoint: OutPoint = outpoint.parse().map_err(js_err)?;
        let template = record
            .kernel_template(&outpoint, CompactTarget(bits), &net.params(), i64::from(from_time))
            .map_err(js_err)?;
        Ok(Self::with_template(net, template))
    }

    /// Read kernel hashes byte-reversed, as historical datasets do.
    #[wasm_bindgen]
    pub fn use_reversed_hash_order(&mut self, reversed: bool) {
        let order = if reversed {
            HashOrder::Reversed
        } else {
            HashOrder::Direct
        };
        self.validator = self.validator.with_hash_order(order);
        if let Some(search) = self.search.as_mut() {
            search.set_validator(self.validator);
        }
    }

    /// Search against a fixed difficulty.
    ///
    /// A window already set continues from its current position with the
    /// new target.
    #[wasm_bindgen]
    pub fn set_difficulty(&mut self, difficulty: f64) -> Result<(), JsValue> {
        let bits = TargetSpec::Difficulty(difficulty).resolve().map_err(js_err)?;
        self.retarget(bits);
        Ok(())
    }

    /// Search against a fraction of a network difficulty (0.8 = 80%).
    #[wasm_bindgen]
    pub fn set_network_fraction(&mut self, bits: u32, fraction: f64) -> Result<(), JsValue> {
        let spec = TargetSpec::NetworkFraction {
            bits: CompactTarget(bits),
            fraction,
        };
        let bits = spec.resolve().map_err(js_err)?;
        self.retarget(bits);
        Ok(())
    }

    /// Set the search window and reset statistics.
    ///
    /// # Arguments
    /// * `from_time` - First candidate time
    /// * `to_time` - Last candidate time (included)
    #[wasm_bindgen]
    pub fn set_window(&mut self, from_time: u32, to_time: u32) -> Result<JsValue, JsValue> {
        let window =
            SearchWindow::new(i64::from(from_time), i64::from(to_time)).map_err(js_err)?;
        self.template.is_protocol_v03 = self.validator.params().is_protocol_v03(window.from);

        let difficulty = self.template.bits.to_difficulty();
        let info = TemplateInfo {
            bits: self.template.bits.bits(),
            difficulty,
            difficulty_display: format_difficulty(difficulty),
            value_coins: self.template.prev_tx_out_value as f64 / self.validator.params().coin as f64,
            is_protocol_v03: self.template.is_protocol_v03,
            window_from: from_time,
            window_to: to_time,
            network: self.network.name().to_string(),
        };

        self.search = Some(KernelSearch::new(self.validator, self.template.clone(), window));
        self.stats = FinderStats::new();
        self.stats.position = Some(from_time);
        self.best_hash = None;

        info.to_js()
    }

    /// Check a batch of candidate times.
    ///
    /// # Arguments
    /// * `batch_size` - Number of seconds to check in this batch
    ///
    /// # Returns
    /// Kernels accepted in the batch and whether the window is exhausted.
    #[wasm_bindgen]
    pub fn search_batch(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let search = self
            .search
            .as_mut()
            .ok_or_else(|| JsValue::from_str("No window set"))?;

        let outcome = search.step_batch(u64::from(batch_size), None).map_err(js_err)?;

        self.stats.total_checked += outcome.checked;
        self.stats.hits_found += outcome.hits.len() as u32;
        self.stats.position = search.position().map(|t| t as u32);

        if self.start_time > 0.0 {
            self.stats.elapsed_ms = js_sys::Date::now() - self.start_time;
            self.stats.update_check_rate();
        }

        for hit in &outcome.hits {
            let is_better = match &self.best_hash {
                None => true,
                Some(best) => hit.kernel_hash < *best,
            };
            if is_better {
                self.best_hash = Some(hit.kernel_hash);
                self.stats.best_hash = Some(hex::encode(hit.kernel_hash));
                self.stats.best_hash_bits = hit.hash_bits;
            }
        }

        let finished = search.is_finished();
        if finished {
            self.is_searching = false;
        }

        BatchResultInfo {
            hits: outcome.hits.iter().map(HitInfo::from).collect(),
            checked: outcome.checked,
            finished,
        }
        .to_js()
    }

    /// Start searching.
    #[wasm_bindgen]
    pub fn start_searching(&mut self) {
        self.is_searching = true;
        self.start_time = js_sys::Date::now();
    }

    /// Stop searching.
    #[wasm_bindgen]
    pub fn stop_searching(&mut self) {
        self.is_searching = false;
    }

    /// Check if searching is active.
    #[wasm_bindgen(getter)]
    pub fn is_searching(&self) -> bool {
        self.is_searching
    }

    /// Get current search statistics.
    #[wasm_bindgen]
    pub fn get_stats(&self) -> Result<JsValue, JsValue> {
        self.stats.to_js()
    }

    /// Get the formatted check rate.
    #[wasm_bindgen]
    pub fn get_check_rate_display(&self) -> String {
        self.stats.format_check_rate()
    }

    /// Get the template as JSON.
    #[wasm_bindgen]
    pub fn template_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.template).map_err(js_err)
    }

    /// Drop the current window and statistics.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.search = None;
        self.stats = FinderStats::new();
        self.start_time = 0.0;
        self.is_searching = false;
        self.best_hash = None;
    }

    /// Get the current network.
    #[wasm_bindgen(getter)]
    pub fn network(&self) -> String {
        self.network.name().to_string()
    }
}

impl StakeFinder {
    fn retarget(&mut self, bits: CompactTarget) {
        self.template.bits = bits;
        if let Some(search) = self.search.as_mut() {
            search.retarget(bits);
        }
    }

    fn with_template(network: Network, template: KernelTemplate) -> Self {
        StakeFinder {
            network,
            validator: KernelValidator::for_network(network),
            template,
            search: None,
            stats: FinderStats::new(),
            start_time: 0.0,
            is_searching: false,
            best_hash: None,
        }
    }
}

/// Log to the browser console.
#[wasm_bindgen]
pub fn console_log(message: &str) {
    web_sys::console::log_1(&JsValue::from_str(message));
}
