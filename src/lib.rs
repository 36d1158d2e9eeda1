//! Echo chat - WebSocket chat session core
//!
//! Connects to a WebSocket echo server and keeps:
//! - a four-state connection indicator (`ConnectionState`)
//! - an append-only transcript of sent, received and system entries (`MessageLog`)
//!
//! The core is transport-agnostic. `cli` adds a tokio-tungstenite transport and
//! a terminal front end; `wasm` adds a browser transport and a JS handle.

pub mod core;

#[cfg(all(feature = "cli", not(target_arch = "wasm32")))]
pub mod config;
#[cfg(all(feature = "cli", not(target_arch = "wasm32")))]
pub mod input;
#[cfg(all(feature = "cli", not(target_arch = "wasm32")))]
pub mod websocket_native;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
mod web;
#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub mod websocket_wasm;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub use web::WebChat;

/// Default WebSocket echo endpoint
pub const DEFAULT_WS_URL: &str = "wss://echo.websocket.org";
