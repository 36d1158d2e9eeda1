//! Connection lifecycle and transcript ownership
//!
//! UI intents (`connect`, `disconnect`, `send`) and transport events both
//! funnel through one mutex around the state, the log and the subscriber
//! list. Calls into the transport are decided under that lock but issued
//! after it is released, so a transport may report events synchronously.
//! Each outbound call names the connection it was decided for, so a call
//! that loses a race with a reconnect cannot land on the newer socket.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::log::{LogEntry, LogSnapshot, MessageLog};
use super::state::ConnectionState;
use super::transport::{
    ConnectionId, Transport, TransportEvent, NORMAL_CLOSURE, REASON_APP_CLOSED,
    REASON_USER_DISCONNECTED,
};

/// Notice appended when the transport reports the socket open
pub const NOTICE_CONNECTED: &str = "Connected to server";
/// Notice appended when the transport reports the socket closed
pub const NOTICE_DISCONNECTED: &str = "Disconnected from server";

/// Change notification for display layers
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ChatUpdate {
    State(ConnectionState),
    Entry(Arc<LogEntry>),
}

struct Inner {
    state: ConnectionState,
    log: MessageLog,
    /// Bumped on every `connect` and on teardown; sinks from older
    /// generations are ignored
    generation: u64,
    subscribers: Vec<Sender<ChatUpdate>>,
    torn_down: bool,
}

impl Inner {
    fn connection(&self) -> ConnectionId {
        ConnectionId(self.generation)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.notify(ChatUpdate::State(state));
    }

    fn push(&mut self, entry: LogEntry) {
        let entry = self.log.append(entry);
        self.notify(ChatUpdate::Entry(entry));
    }

    fn notify(&mut self, update: ChatUpdate) {
        // Receivers that hung up are dropped
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }

    /// Applies a transport event; returns true when the peer's close
    /// handshake must be acknowledged
    fn apply(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    info!("WebSocket connected");
                    self.set_state(ConnectionState::Connected);
                    self.push(LogEntry::system(NOTICE_CONNECTED));
                } else {
                    debug!(state = %self.state, "Open ignored");
                }
            }
            TransportEvent::Text(text) => self.push(LogEntry::received_text(text)),
            TransportEvent::Binary(bytes) => self.push(LogEntry::received_binary(&bytes)),
            TransportEvent::Closing { code, reason } => {
                info!(code, reason = %reason, "WebSocket closing by peer");
                self.set_state(ConnectionState::Disconnected);
                return true;
            }
            TransportEvent::Closed { code, reason } => {
                info!(code, reason = %reason, "WebSocket closed");
                self.set_state(ConnectionState::Disconnected);
                self.push(LogEntry::system(NOTICE_DISCONNECTED));
            }
            TransportEvent::Failure(error) => {
                warn!(error = %error, "WebSocket failed");
                self.set_state(ConnectionState::Failed);
                self.push(LogEntry::system(format!("Connection failed: {error}")));
            }
        }
        false
    }
}

struct Shared<T> {
    inner: Mutex<Inner>,
    transport: T,
    url: String,
}

impl<T> Shared<T> {
    /// Clones one `Arc` under the lock; the copy happens nowhere
    fn snapshot(&self) -> LogSnapshot {
        self.inner.lock().log.snapshot()
    }
}

impl<T: Transport> Shared<T> {
    fn handle(&self, generation: u64, event: TransportEvent) {
        let acknowledge_close = {
            let mut inner = self.inner.lock();
            if generation != inner.generation {
                debug!(generation, current = inner.generation, ?event, "Dropping stale event");
                return;
            }
            inner.apply(event)
        };
        if acknowledge_close {
            // Addressed to the closing connection, not whatever is current now
            self.transport.close(ConnectionId(generation), NORMAL_CLOSURE, "");
        }
    }
}

/// Callback handle given to [`Transport::open`]
///
/// Tied to one connection attempt. Events delivered after the controller
/// moved on to a newer attempt, or was torn down, are discarded.
pub struct EventSink<T> {
    shared: Weak<Shared<T>>,
    generation: u64,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            generation: self.generation,
        }
    }
}

impl<T> EventSink<T> {
    /// The connection this sink reports for
    pub fn connection(&self) -> ConnectionId {
        ConnectionId(self.generation)
    }
}

impl<T: Transport> EventSink<T> {
    pub fn deliver(&self, event: TransportEvent) {
        match self.shared.upgrade() {
            Some(shared) => shared.handle(self.generation, event),
            None => debug!(?event, "Controller gone, dropping event"),
        }
    }
}

/// Owns the connection state, the message log and the transport
///
/// One instance per chat session. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) closes the socket and releases the
/// transport.
pub struct ConnectionController<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> ConnectionController<T> {
    pub fn new(transport: T, url: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    log: MessageLog::new(),
                    generation: 0,
                    subscribers: Vec::new(),
                    torn_down: false,
                }),
                transport,
                url: url.into(),
            }),
        }
    }

    /// Open a connection unless one is already up or in progress
    pub fn connect(&self) {
        let sink = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.can_connect() {
                debug!(state = %inner.state, "Connect ignored");
                return;
            }
            inner.generation += 1;
            inner.set_state(ConnectionState::Connecting);
            EventSink {
                shared: Arc::downgrade(&self.shared),
                generation: inner.generation,
            }
        };
        info!(url = %self.shared.url, connection = %sink.connection(), "Connecting to WebSocket");
        self.shared.transport.open(&self.shared.url, sink);
    }

    /// Close the connection without waiting for the peer to confirm
    pub fn disconnect(&self) {
        let connection = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_connected() {
                debug!(state = %inner.state, "Disconnect ignored");
                return;
            }
            inner.set_state(ConnectionState::Disconnected);
            inner.connection()
        };
        info!(%connection, "Disconnecting");
        self.shared
            .transport
            .close(connection, NORMAL_CLOSURE, REASON_USER_DISCONNECTED);
    }

    /// Send trimmed `text`; ignored when blank or not connected
    pub fn send(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("Blank message ignored");
            return;
        }
        let connection = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_connected() {
                debug!(state = %inner.state, "Send ignored");
                return;
            }
            inner.push(LogEntry::sent(text));
            inner.connection()
        };
        self.shared.transport.send(connection, text);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Frozen transcript; later appends are not reflected
    pub fn snapshot(&self) -> LogSnapshot {
        self.shared.snapshot()
    }

    pub fn entries_since(&self, seen: usize) -> Vec<Arc<LogEntry>> {
        self.snapshot().since(seen).to_vec()
    }

    pub fn log_len(&self) -> usize {
        self.shared.inner.lock().log.len()
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Read-only handle for a display running elsewhere
    pub fn view(&self) -> ChatView<T> {
        ChatView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stream of state changes and new entries, starting with the current state
    pub fn subscribe(&self) -> Receiver<ChatUpdate> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.shared.inner.lock();
        if tx.send(ChatUpdate::State(inner.state)).is_ok() {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// End the session: close the socket and release the transport
    pub fn shutdown(self) {
        drop(self);
    }

    fn teardown(&self) {
        let connection = {
            let mut inner = self.shared.inner.lock();
            if inner.torn_down {
                return;
            }
            let connection = inner.connection();
            inner.torn_down = true;
            inner.generation += 1;
            inner.subscribers.clear();
            connection
        };
        info!(%connection, "Session ended, closing transport");
        self.shared
            .transport
            .close(connection, NORMAL_CLOSURE, REASON_APP_CLOSED);
        self.shared.transport.release();
    }
}

impl<T: Transport> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Read-only view of a controller's state and transcript
pub struct ChatView<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ChatView<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ChatView<T> {
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.shared.snapshot()
    }

    pub fn entries_since(&self, seen: usize) -> Vec<Arc<LogEntry>> {
        self.snapshot().since(seen).to_vec()
    }
}
