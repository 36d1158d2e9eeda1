//! Platform-agnostic core module - shared between the browser build and CLI

pub mod controller;
pub mod log;
pub mod state;
pub mod transport;

pub use controller::{ChatUpdate, ChatView, ConnectionController, EventSink};
pub use log::{LogEntry, LogSnapshot, MessageLog, Origin};
pub use state::ConnectionState;
pub use transport::{ConnectionId, Transport, TransportError, TransportEvent, NORMAL_CLOSURE};
