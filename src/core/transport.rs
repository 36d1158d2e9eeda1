//! Transport contract between the controller and a WebSocket client
//!
//! A transport owns the socket. It reports everything that happens on the
//! wire as a [`TransportEvent`] pushed into the [`EventSink`] it was handed
//! on `open`, possibly from another thread.

use std::time::Duration;

use super::controller::EventSink;

/// Close code for a normal, intentional shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close reason sent when the user disconnects
pub const REASON_USER_DISCONNECTED: &str = "User disconnected";
/// Close reason sent when the session is torn down
pub const REASON_APP_CLOSED: &str = "App closed";

/// Identifies one `open` of a transport
///
/// Outbound calls carry the id of the connection they were decided for; a
/// transport drops calls whose id is not its current connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a connection died
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("handshake timeout after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("runtime unavailable: {0}")]
    Runtime(String),
    #[error("{0}")]
    Other(String),
}

/// Everything a transport can report about its connection
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Open,
    Text(String),
    Binary(Vec<u8>),
    /// Peer started the closing handshake
    Closing { code: u16, reason: String },
    /// Connection fully closed
    Closed { code: u16, reason: String },
    Failure(TransportError),
}

/// A WebSocket client driving a single connection at a time
///
/// Methods take `&self`; implementations keep their socket behind interior
/// mutability. A transport may call [`EventSink::deliver`] synchronously from
/// inside any of these methods.
pub trait Transport: Sized {
    /// Start connecting to `url`, replacing any previous connection.
    /// The new connection's id is `sink.connection()`.
    fn open(&self, url: &str, sink: EventSink<Self>);

    /// Queue a text frame, unless `connection` was superseded
    fn send(&self, connection: ConnectionId, text: &str);

    /// Start the closing handshake, unless `connection` was superseded
    fn close(&self, connection: ConnectionId, code: u16, reason: &str);

    /// Free client resources once the session ends
    fn release(&self) {}
}
