//! In-memory bridge.
//!
//! [`LoopbackBridge`] records every outbound message and lets the caller
//! inject inbound ones, so tests can drive an [`EventCenter`] without a host.
//! Two loopbacks joined with [`LoopbackBridge::pair`] deliver each other's
//! outbound messages, which lets an embedder run both ends of the protocol
//! in one process.
//!
//! [`EventCenter`]: crate::application::event_center::EventCenter

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use multimodal_bridge_core::Message;
use tokio::sync::Notify;

use crate::application::bridge::{Bridge, MessageHandler, TransportError};

pub struct LoopbackBridge {
    available: AtomicBool,
    initialized: AtomicBool,
    ready: AtomicBool,
    handler: Mutex<Option<MessageHandler>>,
    sent: Mutex<Vec<Message>>,
    sent_notify: Notify,
    peer: Mutex<Weak<LoopbackBridge>>,
}

impl LoopbackBridge {
    /// Creates an available loopback with no peer.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            peer: Mutex::new(Weak::new()),
        }
    }

    /// Creates two loopbacks wired to each other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new());
        let b = Arc::new(Self::new());
        *a.peer.lock().expect("lock poisoned") = Arc::downgrade(&b);
        *b.peer.lock().expect("lock poisoned") = Arc::downgrade(&a);
        (a, b)
    }

    /// While unavailable, [`Bridge::call`] fails with
    /// [`TransportError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn has_listener(&self) -> bool {
        self.handler.lock().expect("lock poisoned").is_some()
    }

    /// Delivers `message` to the installed listener, as if it came from the
    /// host.  Dropped when nobody listens.
    pub fn inject(&self, message: Message) {
        let handler = self.handler.lock().expect("lock poisoned").clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    /// Snapshot of every message sent so far.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    /// Drains the sent messages.
    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock().expect("lock poisoned"))
    }

    /// Waits until at least `count` messages have been sent and returns them.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Message> {
        loop {
            let notified = self.sent_notify.notified();
            {
                let sent = self.sent.lock().expect("lock poisoned");
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            notified.await;
        }
    }
}

impl Default for LoopbackBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge for LoopbackBridge {
    fn init(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    fn notify_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn call(&self, message: &Message) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(TransportError::Unavailable);
        }
        self.sent
            .lock()
            .expect("lock poisoned")
            .push(message.clone());
        self.sent_notify.notify_waiters();

        let peer = self.peer.lock().expect("lock poisoned").upgrade();
        if let Some(peer) = peer {
            peer.inject(message.clone());
        }
        Ok(())
    }

    fn listen(&self, handler: MessageHandler) {
        *self.handler.lock().expect("lock poisoned") = Some(handler);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use multimodal_bridge_core::protocol::EventMessage;
    use serde_json::json;

    fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |m| sink.lock().unwrap().push(m));
        (handler, seen)
    }

    #[test]
    fn test_call_records_message() {
        let bridge = LoopbackBridge::new();
        let message: Message = EventMessage::new("e", json!({})).into();

        bridge.call(&message).unwrap();

        assert_eq!(bridge.sent(), vec![message]);
    }

    #[test]
    fn test_unavailable_loopback_rejects_calls() {
        let bridge = LoopbackBridge::new();
        bridge.set_available(false);

        let result = bridge.call(&EventMessage::new("e", json!({})).into());

        assert_eq!(result, Err(TransportError::Unavailable));
        assert!(bridge.sent().is_empty());
    }

    #[test]
    fn test_listen_replaces_previous_handler() {
        let bridge = LoopbackBridge::new();
        let (first, first_seen) = recording_handler();
        let (second, second_seen) = recording_handler();

        bridge.listen(first);
        bridge.listen(second);
        bridge.inject(EventMessage::new("e", json!({})).into());

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(second_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_pair_delivers_to_peer_listener() {
        // Arrange
        let (front, host) = LoopbackBridge::pair();
        let (handler, seen) = recording_handler();
        host.listen(handler);

        // Act
        front.call(&EventMessage::new("e", json!({"n": 1})).into()).unwrap();

        // Assert
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(host.sent().is_empty());
    }

    #[test]
    fn test_take_sent_drains() {
        let bridge = LoopbackBridge::new();
        bridge.call(&EventMessage::new("e", json!({})).into()).unwrap();

        assert_eq!(bridge.take_sent().len(), 1);
        assert!(bridge.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_sent_returns_once_count_reached() {
        let bridge = Arc::new(LoopbackBridge::new());
        let sender = Arc::clone(&bridge);

        tokio::spawn(async move {
            sender.call(&EventMessage::new("late", json!({})).into()).unwrap();
        });
        let sent = bridge.wait_for_sent(1).await;

        assert_eq!(sent[0].name(), Some("late"));
    }

    #[test]
    fn test_wait_for_sent_is_immediate_when_already_sent() {
        let bridge = LoopbackBridge::new();
        bridge.call(&EventMessage::new("early", json!({})).into()).unwrap();

        let sent = tokio_test::block_on(bridge.wait_for_sent(1));

        assert_eq!(sent.len(), 1);
        tokio_test::assert_ok!(bridge.call(&EventMessage::new("again", json!({})).into()));
    }

    #[test]
    fn test_wait_for_sent_stays_pending_until_enough_messages() {
        // Arrange
        let bridge = LoopbackBridge::new();
        bridge.call(&EventMessage::new("one", json!({})).into()).unwrap();
        let mut waiting = tokio_test::task::spawn(bridge.wait_for_sent(2));
        tokio_test::assert_pending!(waiting.poll());

        // Act
        bridge.call(&EventMessage::new("two", json!({})).into()).unwrap();

        // Assert
        assert!(waiting.is_woken());
        let sent = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(sent.len(), 2);
    }
}
