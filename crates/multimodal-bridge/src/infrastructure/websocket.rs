//! WebSocket transport.
//!
//! Connects to a host (or a development host on a desktop) that speaks the
//! bridge protocol as JSON text frames.  Two tasks own the socket halves:
//!
//! ```text
//!  Bridge::call ──► mpsc ──► writer task ──► WebSocket sink
//!  WebSocket stream ──► reader task ──► parse_message_str ──► listener
//! ```
//!
//! `call` only enqueues, so it never blocks.  When either task ends the
//! bridge is marked closed and further calls fail with
//! [`TransportError::Closed`].  Messages already queued when the writer
//! stops are handed to the send-failure hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use multimodal_bridge_core::{parse_message_str, Message};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::application::bridge::{Bridge, MessageHandler, SendFailureHandler, TransportError};

const TRACE_TARGET: &str = "multimodal_bridge::websocket";

type SharedHandler = Arc<Mutex<Option<MessageHandler>>>;
type SharedFailureHandler = Arc<Mutex<Option<SendFailureHandler>>>;

pub struct WebSocketBridge {
    outbound: mpsc::UnboundedSender<Message>,
    handler: SharedHandler,
    on_failure: SharedFailureHandler,
    open: Arc<AtomicBool>,
    initialized: AtomicBool,
    stop: Arc<Notify>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketBridge {
    /// Opens a WebSocket connection to `url` and starts the I/O tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the handshake fails (host
    /// not running, wrong port, refused upgrade).
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to bridge host at {url}"))?;
        info!(target: TRACE_TARGET, %url, "connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let handler: SharedHandler = Arc::new(Mutex::new(None));
        let on_failure: SharedFailureHandler = Arc::new(Mutex::new(None));
        let open = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(Notify::new());

        // ── Writer: queued messages → socket ──────────────────────────────────
        let open_writer = Arc::clone(&open);
        let failure_writer = Arc::clone(&on_failure);
        let stop_writer = Arc::clone(&stop);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = stop_writer.notified() => break,
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                if let Err(e) = sink.send(WsMessage::Text(message.to_json_string())).await {
                    warn!(target: TRACE_TARGET, "send failed: {e}");
                    report_lost(&failure_writer, &message);
                    break;
                }
            }
            open_writer.store(false, Ordering::SeqCst);
            outbound_rx.close();
            while let Ok(message) = outbound_rx.try_recv() {
                report_lost(&failure_writer, &message);
            }
            let _ = sink.close().await;
            debug!(target: TRACE_TARGET, "writer finished");
        });

        // ── Reader: socket → listener ─────────────────────────────────────────
        let open_reader = Arc::clone(&open);
        let handler_reader = Arc::clone(&handler);
        let reader = tokio::spawn(async move {
            loop {
                let frame = match stream.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                        debug!(target: TRACE_TARGET, "host closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(target: TRACE_TARGET, "read failed: {e}");
                        break;
                    }
                };

                match frame {
                    WsMessage::Text(json) => deliver(&handler_reader, &json),
                    WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(json) => deliver(&handler_reader, json),
                        Err(_) => warn!(target: TRACE_TARGET, "non-UTF-8 binary frame ignored"),
                    },
                    WsMessage::Close(_) => {
                        debug!(target: TRACE_TARGET, "close frame received");
                        break;
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                }
            }
            open_reader.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            outbound,
            handler,
            on_failure,
            open,
            initialized: AtomicBool::new(false),
            stop,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// `true` until the host closes the connection.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Stops both I/O tasks.  Messages still queued are reported lost.
    pub fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.stop.notify_one();
        if let Some(reader) = self.reader.lock().expect("lock poisoned").take() {
            reader.abort();
        }
    }
}

fn report_lost(on_failure: &SharedFailureHandler, message: &Message) {
    let hook = on_failure.lock().expect("lock poisoned").clone();
    match hook {
        Some(hook) => hook(message, &TransportError::Closed),
        None => warn!(
            target: TRACE_TARGET,
            callback_id = message.callback_id(),
            "queued message not delivered"
        ),
    }
}

fn deliver(handler: &SharedHandler, json: &str) {
    let message = match parse_message_str(json) {
        Ok(message) => message,
        Err(e) => {
            warn!(target: TRACE_TARGET, "dropping malformed frame: {e}");
            return;
        }
    };
    debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "received");
    let handler = handler.lock().expect("lock poisoned").clone();
    match handler {
        Some(handler) => handler(message),
        None => warn!(target: TRACE_TARGET, "no listener; frame dropped"),
    }
}

impl Bridge for WebSocketBridge {
    fn init(&self) {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            debug!(target: TRACE_TARGET, "initialized");
        }
    }

    fn notify_ready(&self) {
        debug!(target: TRACE_TARGET, "ready");
    }

    fn call(&self, message: &Message) -> Result<(), TransportError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable);
        }
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "sending");
        self.outbound
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    fn listen(&self, handler: MessageHandler) {
        *self.handler.lock().expect("lock poisoned") = Some(handler);
    }

    fn on_send_failure(&self, handler: SendFailureHandler) {
        *self.on_failure.lock().expect("lock poisoned") = Some(handler);
    }

    fn is_available(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && self.is_open()
    }
}

impl Drop for WebSocketBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use multimodal_bridge_core::protocol::{targets, EventMessage, FunctionCallMessage};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    /// Accepts one connection, forwards the first text frame it receives on
    /// `received`, then sends `reply` and keeps the socket open.
    async fn one_shot_host(reply: String) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let WsMessage::Text(text) = frame {
                    let _ = tx.send(text);
                    ws.send(WsMessage::Text(reply.clone())).await.unwrap();
                }
            }
        });
        (format!("ws://{addr}"), rx)
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let result = WebSocketBridge::connect("ws://127.0.0.1:1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_roundtrip_through_host() {
        // Arrange
        let reply = r#"{"type":"event","name":"pong","params":{"ok":true}}"#.to_string();
        let (url, mut host_rx) = one_shot_host(reply).await;
        let bridge = WebSocketBridge::connect(&url).await.unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        bridge.listen(Arc::new(move |m| {
            let _ = seen_tx.send(m);
        }));
        bridge.init();

        // Act
        bridge
            .call(&EventMessage::new("ping", json!({})).into())
            .unwrap();

        // Assert
        let sent: Value = serde_json::from_str(&host_rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent["name"], "ping");
        let received = seen_rx.recv().await.unwrap();
        assert_eq!(received.name(), Some("pong"));
    }

    #[tokio::test]
    async fn test_call_before_init_is_unavailable() {
        let (url, _host_rx) = one_shot_host(String::new()).await;
        let bridge = WebSocketBridge::connect(&url).await.unwrap();

        let result = bridge.call(&EventMessage::new("e", json!({})).into());

        assert_eq!(result, Err(TransportError::Unavailable));
    }

    #[tokio::test]
    async fn test_call_after_shutdown_is_closed() {
        let (url, _host_rx) = one_shot_host(String::new()).await;
        let bridge = WebSocketBridge::connect(&url).await.unwrap();
        bridge.init();

        bridge.shutdown();

        assert_eq!(
            bridge.call(&EventMessage::new("e", json!({})).into()),
            Err(TransportError::Closed)
        );
        assert!(!bridge.is_available());
    }

    #[tokio::test]
    async fn test_calls_still_queued_at_shutdown_are_reported_lost() {
        // Arrange
        let (url, _host_rx) = one_shot_host(String::new()).await;
        let bridge = WebSocketBridge::connect(&url).await.unwrap();
        let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
        bridge.on_send_failure(Arc::new(move |m: &Message, e: &TransportError| {
            let _ = lost_tx.send((m.callback_id(), e.clone()));
        }));
        bridge.init();
        let call: Message = FunctionCallMessage::new("f", 7, targets::client_api()).into();

        // Act
        bridge.call(&call).unwrap();
        bridge.shutdown();

        // Assert
        assert_eq!(lost_rx.recv().await, Some((7, TransportError::Closed)));
    }
}
