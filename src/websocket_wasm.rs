//! Browser WebSocket transport
//!
//! Wraps `web_sys::WebSocket`. Socket callbacks run on the browser event
//! loop and are forwarded to the controller through the event sink.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, error, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use crate::core::{ConnectionId, EventSink, Transport, TransportError, TransportEvent};

/// Live socket plus the callbacks it holds on to
struct Socket {
    connection: ConnectionId,
    ws: WebSocket,
    _on_open: Closure<dyn FnMut(JsValue)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(ErrorEvent)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl Socket {
    /// Detach callbacks and close; nothing more is reported afterwards
    fn shut(self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
        if self.ws.ready_state() <= WebSocket::OPEN {
            if let Err(e) = self.ws.close() {
                debug!(?e, "Close on shut failed");
            }
        }
    }
}

/// WebSocket transport for the browser build
#[derive(Default)]
pub struct WebTransport {
    socket: RefCell<Option<Socket>>,
}

impl WebTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WebTransport {
    fn open(&self, url: &str, sink: EventSink<Self>) {
        if let Some(previous) = self.socket.borrow_mut().take() {
            debug!("Replacing previous connection");
            previous.shut();
        }

        let connection = sink.connection();
        info!(url, %connection, "Connecting to WebSocket");
        let ws = match WebSocket::new(url) {
            Ok(ws) => ws,
            Err(e) => {
                error!(?e, "Failed to create WebSocket");
                sink.deliver(TransportEvent::Failure(TransportError::Connect(format!("{e:?}"))));
                return;
            }
        };
        ws.set_binary_type(BinaryType::Arraybuffer);

        // Browsers fire `close` right after `error`; the failure wins
        let failed = Rc::new(Cell::new(false));

        let sink_clone = sink.clone();
        let on_open = Closure::wrap(Box::new(move |_| {
            info!("WebSocket connected");
            sink_clone.deliver(TransportEvent::Open);
        }) as Box<dyn FnMut(JsValue)>);
        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let sink_clone = sink.clone();
        let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
            let data = e.data();
            if let Some(text) = data.as_string() {
                sink_clone.deliver(TransportEvent::Text(text));
            } else if let Ok(buf) = data.dyn_into::<js_sys::ArrayBuffer>() {
                let bytes = js_sys::Uint8Array::new(&buf).to_vec();
                sink_clone.deliver(TransportEvent::Binary(bytes));
            } else {
                warn!("Unsupported message payload");
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        let sink_clone = sink.clone();
        let failed_clone = failed.clone();
        let on_error = Closure::wrap(Box::new(move |e: ErrorEvent| {
            let msg = e.message();
            error!(error = %msg, "WebSocket error");
            failed_clone.set(true);
            let reason = if msg.is_empty() { "WebSocket error".to_string() } else { msg };
            sink_clone.deliver(TransportEvent::Failure(TransportError::Other(reason)));
        }) as Box<dyn FnMut(ErrorEvent)>);
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        let on_close = Closure::wrap(Box::new(move |e: CloseEvent| {
            let code = e.code();
            let reason = e.reason();
            warn!(code, reason = %reason, "WebSocket closed");
            if failed.get() {
                return;
            }
            sink.deliver(TransportEvent::Closed { code, reason });
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        *self.socket.borrow_mut() = Some(Socket {
            connection,
            ws,
            _on_open: on_open,
            _on_message: on_message,
            _on_error: on_error,
            _on_close: on_close,
        });
    }

    fn send(&self, connection: ConnectionId, text: &str) {
        match self.socket.borrow().as_ref() {
            Some(socket) if socket.connection == connection => {
                if let Err(e) = socket.ws.send_with_str(text) {
                    error!(?e, "Failed to send message");
                }
            }
            _ => debug!(%connection, "No such connection, message dropped"),
        }
    }

    fn close(&self, connection: ConnectionId, code: u16, reason: &str) {
        match self.socket.borrow().as_ref() {
            Some(socket) if socket.connection == connection => {
                if let Err(e) = socket.ws.close_with_code_and_reason(code, reason) {
                    debug!(?e, "Close failed");
                }
            }
            _ => debug!(%connection, "No such connection, close dropped"),
        }
    }

    fn release(&self) {
        if let Some(socket) = self.socket.borrow_mut().take() {
            socket.shut();
        }
    }
}
