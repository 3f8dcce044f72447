//! Client for an unspent output lookup service.
//!
//! The service answers two kinds of `GET` request:
//! - `{base}/{txid}:{index}`: the output's record as JSON, or `ERR: ...`
//! - `{base}/{address}?skip=N`: one `txid:index` per line, then a final
//!   `true`/`false` line telling whether the listing is complete

use serde::Serialize;
use stake_core::{OutPoint, UtxoRecord};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, RequestMode, Response};

/// Unspent output lookup client.
#[wasm_bindgen]
pub struct UnspentApi {
    /// Base URL for the API
    base_url: String,
}

#[wasm_bindgen]
impl UnspentApi {
    /// Create a new client for the service at `base_url`.
    #[wasm_bindgen(constructor)]
    pub fn new(base_url: &str) -> Self {
        UnspentApi {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch one output record as JSON text.
    ///
    /// The text is validated before it is returned, so it can be handed
    /// straight to `StakeFinder.fromUtxo`.
    pub async fn get_utxo(&self, outpoint: &str) -> Result<String, JsValue> {
        let outpoint: OutPoint = outpoint
            .parse()
            .map_err(|e| JsValue::from_str(&format!("{}", e)))?;
        let url = format!("{}/{}", self.base_url, outpoint);
        let text = self.fetch_text(&url).await?;
        parse_utxo_response(&text).map_err(|e| JsValue::from_str(&e))?;
        Ok(text.trim().to_string())
    }

    /// Fetch one page of an address's outputs.
    pub async fn get_outpoints(&self, address: &str, skip: u32) -> Result<JsValue, JsValue> {
        let url = format!("{}/{}?skip={}", self.base_url, address, skip);
        let text = self.fetch_text(&url).await?;
        let listing = parse_outpoint_listing(&text).map_err(|e| JsValue::from_str(&e))?;
        serde_wasm_bindgen::to_value(&listing)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {:?}", e)))
    }

    /// Get the base URL.
    #[wasm_bindgen(getter)]
    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    /// Fetch text from a URL.
    async fn fetch_text(&self, url: &str) -> Result<String, JsValue> {
        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_mode(RequestMode::Cors);

        let request = Request::new_with_str_and_init(url, &opts)?;

        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
        let resp_value = JsFuture::from(window.fetch_with_request(&request)).await?;
        let resp: Response = resp_value.dyn_into()?;

        if !resp.ok() {
            return Err(JsValue::from_str(&format!(
                "HTTP error: {}",
                resp.status()
            )));
        }

        let text = JsFuture::from(resp.text()?).await?;
        text.as_string()
            .ok_or_else(|| JsValue::from_str("Response is not a string"))
    }
}

/// One page of outpoints from the lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutPointListing {
    /// Outpoints in `txid:index` form.
    pub outpoints: Vec<String>,
    /// No outputs remain past this page.
    pub complete: bool,
}

/// Parse an output record response.
pub fn parse_utxo_response(text: &str) -> Result<UtxoRecord, String> {
    let text = text.trim();
    if let Some(err) = text.strip_prefix("ERR:") {
        return Err(err.trim().to_string());
    }
    serde_json::from_str(text).map_err(|e| format!("Failed to parse utxo record: {}", e))
}

/// Parse an outpoint listing response.
pub fn parse_outpoint_listing(text: &str) -> Result<OutPointListing, String> {
    let mut lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if let Some(err) = lines.first().and_then(|l| l.strip_prefix("ERR:")) {
        return Err(err.trim().to_string());
    }

    let complete = match lines.pop() {
        Some("true") => true,
        Some("false") => false,
        other => return Err(format!("Missing completeness line, got {:?}", other)),
    };

    let outpoints = lines
        .into_iter()
        .map(|line| {
            line.parse::<OutPoint>()
                .map(|o| o.to_string())
                .map_err(|e| format!("{}", e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OutPointListing {
        outpoints,
        complete,
    })
}
