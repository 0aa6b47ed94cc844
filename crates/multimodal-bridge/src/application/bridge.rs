//! The transport port.
//!
//! The event center never touches a host directly.  It talks to a [`Bridge`],
//! which knows how to put a [`Message`] on the wire and how to deliver inbound
//! messages back.  Infrastructure provides one implementation per host kind
//! (WebView, Lynx view, WebSocket, in-memory loopback); tests inject their own.

use std::sync::Arc;

use multimodal_bridge_core::Message;
use thiserror::Error;

/// Callback a transport invokes for every inbound message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback a transport invokes for a message it accepted but then failed to
/// deliver.
pub type SendFailureHandler = Arc<dyn Fn(&Message, &TransportError) + Send + Sync>;

/// Error type for transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The host side is missing or has not been initialised.
    #[error("bridge is not available")]
    Unavailable,

    #[error("failed to encode message: {0}")]
    Encode(String),

    /// The connection to the host went away.
    #[error("bridge connection closed")]
    Closed,

    /// The host rejected the message.
    #[error("host error: {0}")]
    Host(String),
}

/// Bidirectional message transport between the front-end and its host.
///
/// Implementations must be cheap to call from synchronous code: `call` only
/// hands the message over and never waits for the reply.  Replies arrive
/// later through the [`MessageHandler`] passed to [`listen`](Bridge::listen).
pub trait Bridge: Send + Sync {
    /// Prepares the transport.  Calling it again has no further effect.
    fn init(&self);

    /// Signals the host that the front-end is ready to receive messages.
    fn notify_ready(&self);

    /// Sends a message to the host.
    ///
    /// `Ok` means the transport took the message.  If it is lost afterwards
    /// (queued and later rejected, or the connection drops first) the
    /// transport reports it to the [`SendFailureHandler`] instead.
    fn call(&self, message: &Message) -> Result<(), TransportError>;

    /// Installs the single inbound dispatcher, replacing any earlier one.
    fn listen(&self, handler: MessageHandler);

    /// Installs the hook for accepted messages that never went out.
    /// Transports that deliver inside `call` have nothing to report.
    fn on_send_failure(&self, _handler: SendFailureHandler) {}

    /// `true` once the transport can carry messages.
    fn is_available(&self) -> bool;
}
