//! Browser entry point
//!
//! Exposes the chat session to JavaScript. The page renders the status
//! indicator from `state()` and the message list from `entries_json()`.

use wasm_bindgen::prelude::*;

use crate::core::ConnectionController;
use crate::websocket_wasm::WebTransport;
use crate::DEFAULT_WS_URL;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    // Initialize tracing for browser console
    tracing_wasm::set_as_global_default();
}

/// One chat session; `free()` from JS closes the socket
#[wasm_bindgen]
pub struct WebChat {
    controller: ConnectionController<WebTransport>,
}

#[wasm_bindgen]
impl WebChat {
    #[wasm_bindgen(constructor)]
    pub fn new(url: Option<String>) -> WebChat {
        let url = url.unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        Self {
            controller: ConnectionController::new(WebTransport::new(), url),
        }
    }

    pub fn connect(&self) {
        self.controller.connect();
    }

    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    pub fn send(&self, text: &str) {
        self.controller.send(text);
    }

    /// Indicator label: DISCONNECTED, CONNECTING, CONNECTED or FAILED
    pub fn state(&self) -> String {
        self.controller.state().label().to_string()
    }

    #[wasm_bindgen(js_name = logLength)]
    pub fn log_length(&self) -> usize {
        self.controller.log_len()
    }

    /// Whole transcript as a JSON array
    #[wasm_bindgen(js_name = entriesJson)]
    pub fn entries_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.controller.snapshot())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Entries after the first `seen`, as a JSON array
    #[wasm_bindgen(js_name = entriesSinceJson)]
    pub fn entries_since_json(&self, seen: usize) -> Result<String, JsValue> {
        serde_json::to_string(&self.controller.entries_since(seen))
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
