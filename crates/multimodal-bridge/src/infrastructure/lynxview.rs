//! Lynx view transport.
//!
//! A Lynx host exposes a native module that accepts plain JSON objects; no
//! string encoding is involved.  Inbound objects arrive through
//! [`LynxBridge::on_native_message`].
//!
//! # Handshake
//!
//! The native side cannot receive calls until the front-end has signalled
//! readiness.  Calls made after `init` but before `notify_ready` are queued,
//! up to [`BridgeConfig::lynx_queue_limit`], and flushed in order during the
//! handshake.  Without an injected native module the transport never becomes
//! available and every call fails with [`TransportError::Unavailable`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use multimodal_bridge_core::{parse_message, Message};
use serde_json::Value;
use tracing::{debug, warn};

use crate::application::bridge::{Bridge, MessageHandler, SendFailureHandler, TransportError};
use crate::domain::config::BridgeConfig;

const TRACE_TARGET: &str = "multimodal_bridge::lynxview";

/// The native module the Lynx host injects.
#[cfg_attr(test, mockall::automock)]
pub trait NativeModule: Send + Sync {
    /// Delivers one message object to the native side.
    fn call(&self, message: Value) -> Result<(), String>;

    /// Tells the native side the front-end is ready.
    fn ready(&self);
}

#[derive(Default)]
struct LynxState {
    available: bool,
    handshake: bool,
    flushing: bool,
    queue: VecDeque<Message>,
}

/// Transport over a Lynx native module.
///
/// The state lock is never held while the native module runs: a host may
/// answer inside its own `call`, re-entering this bridge on the same thread.
pub struct LynxBridge {
    module: Option<Arc<dyn NativeModule>>,
    queue_limit: usize,
    state: Mutex<LynxState>,
    handler: Mutex<Option<MessageHandler>>,
    on_failure: Mutex<Option<SendFailureHandler>>,
}

impl LynxBridge {
    pub fn new(module: Option<Arc<dyn NativeModule>>, config: &BridgeConfig) -> Self {
        Self {
            module,
            queue_limit: config.lynx_queue_limit,
            state: Mutex::new(LynxState::default()),
            handler: Mutex::new(None),
            on_failure: Mutex::new(None),
        }
    }

    /// Inbound entry point for objects sent by the native side.
    pub fn on_native_message(&self, message: Value) {
        let message = match parse_message(&message) {
            Ok(message) => message,
            Err(e) => {
                warn!(target: TRACE_TARGET, "dropping malformed message: {e}");
                return;
            }
        };
        debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "received");

        let handler = self.handler.lock().expect("lock poisoned").clone();
        match handler {
            Some(handler) => handler(message),
            None => warn!(target: TRACE_TARGET, "no listener; message dropped"),
        }
    }

    /// Number of calls waiting for the handshake.
    pub fn queued(&self) -> usize {
        self.state.lock().expect("lock poisoned").queue.len()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().expect("lock poisoned").handshake
    }

    fn send(module: &dyn NativeModule, message: &Message) -> Result<(), TransportError> {
        module
            .call(message.to_plain_object())
            .map_err(TransportError::Host)
    }

    fn report_failure(&self, message: &Message, error: &TransportError) {
        let hook = self.on_failure.lock().expect("lock poisoned").clone();
        match hook {
            Some(hook) => hook(message, error),
            None => warn!(
                target: TRACE_TARGET,
                callback_id = message.callback_id(),
                "queued message not delivered: {error}"
            ),
        }
    }
}

impl Bridge for LynxBridge {
    fn init(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.available {
            return;
        }
        if self.module.is_none() {
            warn!(target: TRACE_TARGET, "no native module; bridge stays unavailable");
            return;
        }
        state.available = true;
        debug!(target: TRACE_TARGET, "initialized");
    }

    fn notify_ready(&self) {
        let Some(module) = self.module.as_deref() else {
            warn!(target: TRACE_TARGET, "ready signalled without a native module");
            return;
        };
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.handshake || state.flushing {
                return;
            }
            state.flushing = true;
        }
        module.ready();

        // Calls made while flushing, including replies the host triggers from
        // inside `module.call`, join the queue and go out in a later batch.
        let mut flushed = 0usize;
        loop {
            let batch = {
                let mut state = self.state.lock().expect("lock poisoned");
                if state.queue.is_empty() {
                    state.flushing = false;
                    state.handshake = true;
                    break;
                }
                std::mem::take(&mut state.queue)
            };
            for message in batch {
                flushed += 1;
                if let Err(e) = Self::send(module, &message) {
                    self.report_failure(&message, &e);
                }
            }
        }
        debug!(target: TRACE_TARGET, flushed, "handshake complete");
    }

    fn call(&self, message: &Message) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.available {
                return Err(TransportError::Unavailable);
            }
            if !state.handshake {
                if state.queue.len() >= self.queue_limit {
                    warn!(target: TRACE_TARGET, limit = self.queue_limit, "pre-handshake queue full");
                    return Err(TransportError::Unavailable);
                }
                debug!(target: TRACE_TARGET, callback_id = message.callback_id(), "queued until handshake");
                state.queue.push_back(message.clone());
                return Ok(());
            }
        }

        let module = self.module.as_deref().ok_or(TransportError::Unavailable)?;
        debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "sending");
        Self::send(module, message)
    }

    fn listen(&self, handler: MessageHandler) {
        *self.handler.lock().expect("lock poisoned") = Some(handler);
    }

    fn on_send_failure(&self, handler: SendFailureHandler) {
        *self.on_failure.lock().expect("lock poisoned") = Some(handler);
    }

    fn is_available(&self) -> bool {
        self.state.lock().expect("lock poisoned").available
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
