//! Native WebSocket transport
//!
//! Uses tokio-tungstenite in a background thread per connection. The
//! controller drives it through a command channel; everything read from the
//! socket is delivered back through the connection's event sink.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::core::{ConnectionId, EventSink, Transport, TransportError, TransportEvent};

/// Default bound on the opening handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Close code reported when the peer closed without a status
const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the socket dropped without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

enum Command {
    Send(String),
    Close { code: u16, reason: String },
}

/// WebSocket transport backed by tokio-tungstenite
pub struct NativeTransport {
    handshake_timeout: Duration,
    /// Commands for the live connection thread, if any, keyed by its id
    commands: Mutex<Option<(ConnectionId, UnboundedSender<Command>)>>,
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl NativeTransport {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            commands: Mutex::new(None),
        }
    }

    fn command(&self, connection: ConnectionId, command: Command) {
        match self.commands.lock().as_ref() {
            Some((current, tx)) if *current == connection => {
                if tx.send(command).is_err() {
                    debug!(%connection, "Connection thread gone, command dropped");
                }
            }
            Some((current, _)) => {
                debug!(%connection, %current, "Command for superseded connection dropped");
            }
            None => debug!(%connection, "No connection, command dropped"),
        }
    }

    async fn run_websocket(
        url: &str,
        handshake_timeout: Duration,
        mut commands: UnboundedReceiver<Command>,
        sink: &EventSink<NativeTransport>,
    ) {
        info!(url, "Connecting to WebSocket");

        let ws_stream = match tokio::time::timeout(handshake_timeout, connect_async(url)).await {
            Ok(Ok((stream, _))) => {
                info!("WebSocket handshake complete");
                stream
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect");
                sink.deliver(TransportEvent::Failure(TransportError::Connect(e.to_string())));
                return;
            }
            Err(_) => {
                error!(timeout = ?handshake_timeout, "Handshake timed out");
                sink.deliver(TransportEvent::Failure(TransportError::Timeout(handshake_timeout)));
                return;
            }
        };
        sink.deliver(TransportEvent::Open);

        let (mut write, mut read) = ws_stream.split();
        let mut closing_locally = false;
        let mut peer_close: Option<(u16, String)> = None;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => sink.deliver(TransportEvent::Text(text)),
                        Some(Ok(Message::Binary(bytes))) => sink.deliver(TransportEvent::Binary(bytes)),
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.into_owned()))
                                .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                            if !closing_locally {
                                warn!(code, reason = %reason, "WebSocket closed by server");
                                sink.deliver(TransportEvent::Closing { code, reason: reason.clone() });
                            }
                            peer_close = Some((code, reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) | None => break,
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            sink.deliver(TransportEvent::Failure(TransportError::Protocol(e.to_string())));
                            return;
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Send(text)) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                error!(error = %e, "Failed to send message");
                                sink.deliver(TransportEvent::Failure(TransportError::Protocol(e.to_string())));
                                return;
                            }
                        }
                        Some(Command::Close { code, reason }) => {
                            if closing_locally || peer_close.is_some() {
                                debug!(code, "Close already in progress");
                            } else {
                                closing_locally = true;
                                let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                                    debug!(error = %e, "Close frame not sent");
                                }
                            }
                        }
                        None => {
                            // Transport released or superseded by a newer connection
                            if !closing_locally && peer_close.is_none() {
                                if let Err(e) = write.send(Message::Close(None)).await {
                                    debug!(error = %e, "Close frame not sent");
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }

        let (code, reason) = peer_close.unwrap_or((ABNORMAL_CLOSURE, String::new()));
        info!(code, "WebSocket stream ended");
        sink.deliver(TransportEvent::Closed { code, reason });
    }
}

impl Transport for NativeTransport {
    /// Spawns a background thread with a tokio runtime to own the socket.
    fn open(&self, url: &str, sink: EventSink<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Dropping the previous sender winds down that connection's thread
        if let Some((previous, _)) = self.commands.lock().replace((sink.connection(), tx)) {
            debug!(%previous, "Replacing previous connection");
        }

        let url = url.to_string();
        let handshake_timeout = self.handshake_timeout;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "Failed to create tokio runtime");
                    sink.deliver(TransportEvent::Failure(TransportError::Runtime(e.to_string())));
                    return;
                }
            };
            rt.block_on(async move {
                Self::run_websocket(&url, handshake_timeout, rx, &sink).await;
            });
        });
    }

    fn send(&self, connection: ConnectionId, text: &str) {
        self.command(connection, Command::Send(text.to_string()));
    }

    fn close(&self, connection: ConnectionId, code: u16, reason: &str) {
        self.command(connection, Command::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn release(&self) {
        self.commands.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::controller::NOTICE_CONNECTED;
    use crate::core::{ChatUpdate, ConnectionController, ConnectionState, Origin};
    use std::sync::mpsc::Receiver;
    use std::time::Instant;

    /// Local echo server on an ephemeral port; returns its ws:// URL
    fn spawn_echo_server() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        listener.set_nonblocking(true).expect("nonblocking");

        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("runtime");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                            return;
                        };
                        while let Some(Ok(msg)) = ws.next().await {
                            if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                    });
                }
            });
        });

        format!("ws://{addr}")
    }

    fn wait_for(rx: &Receiver<ChatUpdate>, mut pred: impl FnMut(&ChatUpdate) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(update) if pred(&update) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        false
    }

    #[test]
    fn test_echo_round_trip() {
        let url = spawn_echo_server();
        let controller = ConnectionController::new(NativeTransport::default(), url);
        let rx = controller.subscribe();

        controller.connect();
        assert!(wait_for(&rx, |u| *u == ChatUpdate::State(ConnectionState::Connected)));
        assert_eq!(controller.snapshot()[0].content(), NOTICE_CONNECTED);

        controller.send("hello");
        assert!(wait_for(&rx, |u| matches!(
            u,
            ChatUpdate::Entry(e) if e.origin() == Origin::Received && e.content() == "hello"
        )));

        controller.disconnect();
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(wait_for(&rx, |u| matches!(
            u,
            ChatUpdate::Entry(e) if e.content() == "Disconnected from server"
        )));
    }

    #[test]
    fn test_refused_connection_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let controller =
            ConnectionController::new(NativeTransport::default(), format!("ws://127.0.0.1:{port}"));
        let rx = controller.subscribe();

        controller.connect();
        assert!(wait_for(&rx, |u| *u == ChatUpdate::State(ConnectionState::Failed)));
        let last = controller.snapshot().last().cloned().expect("failure notice");
        assert!(last.content().starts_with("Connection failed:"));
    }

    #[test]
    fn test_silent_server_times_out() {
        // Accepts TCP but never answers the upgrade request
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("local addr"));
        let controller =
            ConnectionController::new(NativeTransport::new(Duration::from_millis(200)), url);
        let rx = controller.subscribe();

        controller.connect();
        assert!(wait_for(&rx, |u| *u == ChatUpdate::State(ConnectionState::Failed)));
        let last = controller.snapshot().last().cloned().expect("failure notice");
        assert!(last.content().contains("timeout"));
        drop(listener);
    }

    #[test]
    fn test_commands_without_connection_are_dropped() {
        let transport = NativeTransport::default();
        transport.send(ConnectionId(1), "nobody home");
        transport.close(ConnectionId(1), 1000, "bye");
        transport.release();
        assert!(transport.commands.lock().is_none());
    }

    #[test]
    fn test_commands_for_superseded_connection_are_dropped() {
        let transport = NativeTransport::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *transport.commands.lock() = Some((ConnectionId(2), tx));

        // A late close acknowledgement for the previous connection
        transport.close(ConnectionId(1), 1000, "");
        assert!(rx.try_recv().is_err());

        transport.send(ConnectionId(2), "hello");
        assert!(matches!(rx.try_recv(), Ok(Command::Send(text)) if text == "hello"));

        transport.close(ConnectionId(2), 1000, "User disconnected");
        assert!(matches!(
            rx.try_recv(),
            Ok(Command::Close { code: 1000, reason }) if reason == "User disconnected"
        ));
    }
}
