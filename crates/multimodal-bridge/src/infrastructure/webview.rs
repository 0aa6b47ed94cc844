//! WebView transport.
//!
//! A WebView host exchanges messages as JSON *strings*:
//!
//! - **Outbound**: the host injects a post function into the page.  Here it
//!   is the [`HostPoster`] handed to [`WebViewBridge::new`].
//! - **Inbound**: the host evaluates a global receiver with the JSON text of
//!   each message.  Here that receiver is [`WebViewBridge::on_webview_message`].
//!
//! # Message port
//!
//! Newer hosts hand the page a dedicated message port.  Once one is attached
//! with [`WebViewBridge::attach_port`], every outbound message goes through it
//! instead of the post function, and [`WebViewBridge::run_port`] pumps the
//! port's inbound side into the same receiver.
//!
//! # Availability
//!
//! `call` before `init` fails with [`TransportError::Unavailable`]; nothing is
//! queued.  A bridge with neither a poster nor a port never becomes available.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use multimodal_bridge_core::{parse_message_str, Message};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::bridge::{Bridge, MessageHandler, TransportError};

const TRACE_TARGET: &str = "multimodal_bridge::webview";

/// The host-provided function that delivers a JSON string to the native side.
#[cfg_attr(test, mockall::automock)]
pub trait HostPoster: Send + Sync {
    /// Posts one message.  `Err` carries the host's reason.
    fn post(&self, json: &str) -> Result<(), String>;
}

/// A host message port: one sender towards the host, one receiver from it.
pub struct MessagePort {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

pub struct WebViewBridge {
    poster: Option<Arc<dyn HostPoster>>,
    initialized: AtomicBool,
    handler: Mutex<Option<MessageHandler>>,
    port_sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    port_receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl WebViewBridge {
    /// Creates a WebView transport.  `poster` is `None` when the page runs
    /// outside a host (e.g. in a plain browser).
    pub fn new(poster: Option<Arc<dyn HostPoster>>) -> Self {
        Self {
            poster,
            initialized: AtomicBool::new(false),
            handler: Mutex::new(None),
            port_sender: Mutex::new(None),
            port_receiver: Mutex::new(None),
        }
    }

    /// Routes all further traffic through `port`.
    pub fn attach_port(&self, port: MessagePort) {
        debug!(target: TRACE_TARGET, "message port attached");
        *self.port_sender.lock().expect("lock poisoned") = Some(port.outbound);
        *self.port_receiver.lock().expect("lock poisoned") = Some(port.inbound);
    }

    fn has_port(&self) -> bool {
        self.port_sender.lock().expect("lock poisoned").is_some()
    }

    /// The global receiver: parses `json` and hands it to the listener.
    ///
    /// Malformed input is logged and dropped.
    pub fn on_webview_message(&self, json: &str) {
        let message = match parse_message_str(json) {
            Ok(message) => message,
            Err(e) => {
                warn!(target: TRACE_TARGET, "dropping malformed message: {e}");
                return;
            }
        };
        debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "received");

        // Clone out so the listener runs without the lock held.
        let handler = self.handler.lock().expect("lock poisoned").clone();
        match handler {
            Some(handler) => handler(message),
            None => warn!(target: TRACE_TARGET, "no listener; message dropped"),
        }
    }

    /// Pumps the attached port's inbound side until the host closes it.
    ///
    /// Returns immediately if no port is attached or another task is already
    /// pumping it.
    pub async fn run_port(&self) {
        let receiver = self.port_receiver.lock().expect("lock poisoned").take();
        let Some(mut receiver) = receiver else {
            debug!(target: TRACE_TARGET, "no message port to run");
            return;
        };
        while let Some(json) = receiver.recv().await {
            self.on_webview_message(&json);
        }
        debug!(target: TRACE_TARGET, "message port closed by host");
    }
}

impl Bridge for WebViewBridge {
    fn init(&self) {
        if self.poster.is_none() && !self.has_port() {
            warn!(target: TRACE_TARGET, "no host post function; bridge stays unavailable");
            return;
        }
        if !self.initialized.swap(true, Ordering::SeqCst) {
            debug!(target: TRACE_TARGET, "initialized");
        }
    }

    fn notify_ready(&self) {
        // WebView hosts load the page themselves; there is no handshake.
        debug!(target: TRACE_TARGET, "ready");
    }

    fn call(&self, message: &Message) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(TransportError::Unavailable);
        }
        let json = message.to_json_string();
        debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "posting");

        if let Some(sender) = self.port_sender.lock().expect("lock poisoned").as_ref() {
            return sender.send(json).map_err(|_| TransportError::Closed);
        }
        match &self.poster {
            Some(poster) => poster.post(&json).map_err(TransportError::Host),
            None => Err(TransportError::Unavailable),
        }
    }

    fn listen(&self, handler: MessageHandler) {
        *self.handler.lock().expect("lock poisoned") = Some(handler);
    }

    fn is_available(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use multimodal_bridge_core::protocol::{targets, EventMessage, FunctionCallMessage};
    use serde_json::{json, Value};

    fn recording_listener(bridge: &WebViewBridge) -> Arc<Mutex<Vec<Message>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bridge.listen(Arc::new(move |m| sink.lock().unwrap().push(m)));
        seen
    }

    #[test]
    fn test_call_before_init_is_unavailable() {
        // Arrange
        let mut poster = MockHostPoster::new();
        poster.expect_post().never();
        let bridge = WebViewBridge::new(Some(Arc::new(poster)));

        // Act
        let result = bridge.call(&EventMessage::new("e", json!({})).into());

        // Assert
        assert_eq!(result, Err(TransportError::Unavailable));
    }

    #[test]
    fn test_init_without_host_stays_unavailable() {
        let bridge = WebViewBridge::new(None);

        bridge.init();

        assert!(!bridge.is_available());
    }

    #[test]
    fn test_call_posts_json_string() {
        // Arrange
        let mut poster = MockHostPoster::new();
        poster
            .expect_post()
            .withf(|json: &str| {
                let value: Value = serde_json::from_str(json).unwrap();
                value["type"] == "call" && value["name"] == "ping" && value["callbackId"] == 9
            })
            .times(1)
            .returning(|_| Ok(()));
        let bridge = WebViewBridge::new(Some(Arc::new(poster)));
        bridge.init();

        // Act
        let result =
            bridge.call(&FunctionCallMessage::new("ping", 9, targets::client_api()).into());

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_host_rejection_surfaces_as_host_error() {
        let mut poster = MockHostPoster::new();
        poster
            .expect_post()
            .returning(|_| Err("quota exceeded".to_string()));
        let bridge = WebViewBridge::new(Some(Arc::new(poster)));
        bridge.init();

        let result = bridge.call(&EventMessage::new("e", json!({})).into());

        assert_eq!(result, Err(TransportError::Host("quota exceeded".into())));
    }

    #[test]
    fn test_inbound_json_reaches_listener() {
        let bridge = WebViewBridge::new(None);
        let seen = recording_listener(&bridge);

        bridge.on_webview_message(
            r#"{"type":"event","name":"tick","params":{},"timestamp":5,"callbackId":1}"#,
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name(), Some("tick"));
    }

    #[test]
    fn test_malformed_inbound_is_dropped() {
        let bridge = WebViewBridge::new(None);
        let seen = recording_listener(&bridge);

        bridge.on_webview_message("not json");
        bridge.on_webview_message(r#"{"type":"callback","callbackId":1}"#);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attached_port_carries_outbound_and_inbound() {
        // Arrange
        let mut poster = MockHostPoster::new();
        poster.expect_post().never();
        let bridge = Arc::new(WebViewBridge::new(Some(Arc::new(poster))));
        let (to_host, mut host_rx) = mpsc::unbounded_channel();
        let (host_tx, from_host) = mpsc::unbounded_channel();
        bridge.attach_port(MessagePort {
            outbound: to_host,
            inbound: from_host,
        });
        bridge.init();
        let seen = recording_listener(&bridge);

        // Act
        bridge
            .call(&EventMessage::new("out", json!({})).into())
            .unwrap();
        host_tx
            .send(r#"{"type":"event","name":"in","params":{}}"#.to_string())
            .unwrap();
        drop(host_tx);
        bridge.run_port().await;

        // Assert
        let posted: Value = serde_json::from_str(&host_rx.recv().await.unwrap()).unwrap();
        assert_eq!(posted["name"], "out");
        assert_eq!(seen.lock().unwrap()[0].name(), Some("in"));
    }

    #[test]
    fn test_init_with_port_only_is_available() {
        let bridge = WebViewBridge::new(None);
        let (outbound, _host_rx) = mpsc::unbounded_channel();
        let (_host_tx, inbound) = mpsc::unbounded_channel();
        bridge.attach_port(MessagePort { outbound, inbound });

        bridge.init();

        assert!(bridge.is_available());
    }
}
