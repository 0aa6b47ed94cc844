//! EventCenter: routes every message crossing the bridge.
//!
//! One event center sits on top of one [`Bridge`].  It owns three tables:
//!
//! - **function call handlers**, at most one per name, answering inbound
//!   [`FunctionCallMessage`]s with a callback;
//! - **pending callbacks**, keyed by callback id, each fired at most once when
//!   the matching [`CallbackMessage`] arrives (or its deadline passes);
//! - **event handlers**, any number per name, fanned out in registration order.
//!
//! # Concurrency
//!
//! Dispatch is synchronous.  The tables are guarded by `std::sync::Mutex`es
//! that are never held while user code runs: handlers are looked up (or
//! removed) under the lock and invoked after it is released, so a handler may
//! register, unregister or send without deadlocking.  Function call handlers
//! are async and run in spawned tokio tasks.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use multimodal_bridge_core::protocol::{
    CallbackMessage, EventMessage, FailedCallResult, FunctionCallMessage, IdGenerator,
};
use multimodal_bridge_core::{
    ApiCallError, CallResult, InternalErrorCallResult, Message, RawCallResult, TargetEntity,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::bridge::{Bridge, MessageHandler, SendFailureHandler, TransportError};
use crate::domain::config::BridgeConfig;

const TRACE_TARGET: &str = "multimodal_bridge::event_center";

/// Identifier correlating a function call with its callback.
pub type CallbackId = u64;

type FunctionCallHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, CallResult> + Send + Sync>;
type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Business failure returned by a function call handler.
///
/// Travels back to the caller as a `FAILED` call result carrying `msg` and
/// the optional `data` payload.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{msg}")]
pub struct HandlerError {
    pub msg: String,
    pub data: Option<Value>,
}

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            data: None,
        }
    }

    /// Attaches a failure payload.  Payloads that do not serialize to a JSON
    /// object are dropped.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.data = serde_json::to_value(data).ok().filter(Value::is_object);
        self
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self::new(msg)
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self::new(msg)
    }
}

/// Forwards a downstream API failure as this handler's failure.
impl From<ApiCallError> for HandlerError {
    fn from(error: ApiCallError) -> Self {
        let data = match &error {
            ApiCallError::CallFailed { data, .. } => data.clone(),
            _ => None,
        };
        Self {
            msg: error.msg().to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("a function call handler for `{0}` is already registered")]
    Duplicate(String),
}

/// Options for [`EventCenter::register_function_call_handler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionCallOptions {
    /// Replace an existing handler instead of failing.  The replaced
    /// handler's [`Unregister`] handle becomes a no-op.
    pub allow_overwrite: bool,
}

/// Options for [`EventCenter::register_callback`].
#[derive(Debug, Clone, Default)]
pub struct CallbackOptions {
    /// API name prefixed to error messages.
    pub api_name: Option<String>,
    /// Deadline for this callback.  `None` falls back to
    /// [`BridgeConfig::callback_timeout`].
    pub timeout: Option<Duration>,
}

/// Handle returned by registrations; undoes the registration once.
pub struct Unregister {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unregister {
    fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Removes the registration.  Later calls do nothing.
    pub fn unregister(&self) {
        let action = self.action.lock().expect("lock poisoned").take();
        if let Some(action) = action {
            action();
        }
    }
}

impl std::fmt::Debug for Unregister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let armed = self.action.lock().map(|a| a.is_some()).unwrap_or(false);
        f.debug_struct("Unregister").field("armed", &armed).finish()
    }
}

enum PendingCallback {
    /// Receives the parsed result, or `Err` when the call never left.
    Typed(Box<dyn FnOnce(Result<CallResult, ApiCallError>) + Send>),
    Raw(Box<dyn FnOnce(RawCallResult) + Send>),
}

impl PendingCallback {
    fn resolve(self, message: &CallbackMessage) {
        match self {
            PendingCallback::Typed(f) => f(Ok(message.parsed_params())),
            PendingCallback::Raw(f) => f(message.raw_params()),
        }
    }

    fn reject(self, error: ApiCallError) {
        match self {
            PendingCallback::Typed(f) => f(Err(error)),
            PendingCallback::Raw(f) => f(error.to_call_result().to_raw()),
        }
    }

    fn expire(self) {
        let result = internal(InternalErrorCallResult::timeout());
        match self {
            PendingCallback::Typed(f) => f(Ok(result)),
            PendingCallback::Raw(f) => f(result.to_raw()),
        }
    }
}

struct PendingEntry {
    callback: PendingCallback,
    deadline: Option<JoinHandle<()>>,
}

struct Inner {
    bridge: Arc<dyn Bridge>,
    config: BridgeConfig,
    callback_ids: IdGenerator,
    registration_tokens: AtomicU64,
    function_handlers: Mutex<HashMap<String, (u64, FunctionCallHandler)>>,
    event_handlers: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    callbacks: Mutex<HashMap<CallbackId, PendingEntry>>,
}

impl Inner {
    fn next_token(&self) -> u64 {
        self.registration_tokens.fetch_add(1, Ordering::Relaxed)
    }

    fn take_callback(&self, id: CallbackId) -> Option<PendingCallback> {
        let entry = self.callbacks.lock().expect("lock poisoned").remove(&id)?;
        if let Some(deadline) = entry.deadline {
            deadline.abort();
        }
        Some(entry.callback)
    }

    fn expire_callback(&self, id: CallbackId) {
        // The timer task is the one running; nothing to abort.
        let entry = self.callbacks.lock().expect("lock poisoned").remove(&id);
        if let Some(entry) = entry {
            warn!(target: TRACE_TARGET, callback_id = id, "callback timed out");
            entry.callback.expire();
        }
    }
}

/// Cheaply cloneable handle to an event center.
#[derive(Clone)]
pub struct EventCenter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCenter")
            .field("pending_callbacks", &self.pending_callbacks())
            .finish_non_exhaustive()
    }
}

impl EventCenter {
    /// Creates an event center on top of `bridge`.
    ///
    /// Initialises the bridge and installs this center as its inbound
    /// dispatcher.  The bridge only holds a weak reference back, so dropping
    /// every `EventCenter` handle releases the tables.
    pub fn new(bridge: Arc<dyn Bridge>, config: BridgeConfig) -> Self {
        let inner = Arc::new(Inner {
            bridge: Arc::clone(&bridge),
            config,
            callback_ids: IdGenerator::new(),
            registration_tokens: AtomicU64::new(1),
            function_handlers: Mutex::new(HashMap::new()),
            event_handlers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&inner);
        let dispatcher: MessageHandler = Arc::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                EventCenter { inner }.dispatch(message);
            }
        });
        let weak = Arc::downgrade(&inner);
        let on_failure: SendFailureHandler = Arc::new(move |message, error| {
            if let Some(inner) = weak.upgrade() {
                EventCenter { inner }.send_failed(message, error);
            }
        });
        bridge.init();
        bridge.listen(dispatcher);
        bridge.on_send_failure(on_failure);

        Self { inner }
    }

    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.inner.bridge
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    fn weak(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Registers the handler answering calls to `name`.
    ///
    /// Inbound params are deserialized into `P`; failure answers the call with
    /// `INVALID_PARAMS` without running the handler.  The handler's `Ok` value
    /// must serialize to a JSON object (or unit, sent as `{}`), otherwise the
    /// call is answered with `INVALID_RESULT`.  `Err` and panics answer with
    /// `FAILED`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::Duplicate`] if a handler is already registered for
    /// `name` and `options.allow_overwrite` is not set.
    pub fn register_function_call_handler<P, R, F, Fut>(
        &self,
        name: impl Into<String>,
        handler: F,
        options: FunctionCallOptions,
    ) -> Result<Unregister, RegistrationError>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        let erased_name = name.clone();
        let erased: FunctionCallHandler = Arc::new(move |params: Value| {
            let params = match serde_json::from_value::<P>(params) {
                Ok(params) => params,
                Err(e) => {
                    warn!(target: TRACE_TARGET, name = %erased_name, "rejecting call params: {e}");
                    return future::ready(internal(InternalErrorCallResult::invalid_params())).boxed();
                }
            };
            let fut = handler(params);
            async move {
                let result: CallResult = match fut.await {
                    Ok(data) => match serde_json::to_value(data).map(into_object) {
                        Ok(Some(data)) => CallResult::success(data),
                        _ => internal(InternalErrorCallResult::invalid_result()),
                    },
                    Err(HandlerError { msg, data }) => {
                        CallResult::Failed(FailedCallResult { msg, data })
                    }
                };
                result
            }
            .boxed()
        });

        let token = self.inner.next_token();
        {
            let mut handlers = self.inner.function_handlers.lock().expect("lock poisoned");
            if handlers.contains_key(&name) && !options.allow_overwrite {
                return Err(RegistrationError::Duplicate(name));
            }
            if handlers.insert(name.clone(), (token, erased)).is_some() {
                debug!(target: TRACE_TARGET, %name, "function call handler replaced");
            }
        }

        let weak = self.weak();
        Ok(Unregister::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut handlers = inner.function_handlers.lock().expect("lock poisoned");
            if handlers.get(&name).is_some_and(|(t, _)| *t == token) {
                handlers.remove(&name);
            }
        }))
    }

    /// Registers an additional handler for events named `name`.
    ///
    /// Event params that do not deserialize into `P` are skipped for this
    /// handler only.
    pub fn register_event_handler<P, F>(&self, name: impl Into<String>, handler: F) -> Unregister
    where
        P: DeserializeOwned + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        let name = name.into();
        let erased_name = name.clone();
        let erased: EventHandler = Arc::new(move |params: &Value| {
            match serde_json::from_value::<P>(params.clone()) {
                Ok(params) => handler(params),
                Err(e) => {
                    warn!(target: TRACE_TARGET, name = %erased_name, "skipping event handler: {e}")
                }
            }
        });

        let token = self.inner.next_token();
        self.inner
            .event_handlers
            .lock()
            .expect("lock poisoned")
            .entry(name.clone())
            .or_default()
            .push((token, erased));

        let weak = self.weak();
        Unregister::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut handlers = inner.event_handlers.lock().expect("lock poisoned");
            if let Some(list) = handlers.get_mut(&name) {
                list.retain(|(t, _)| *t != token);
                if list.is_empty() {
                    handlers.remove(&name);
                }
            }
        })
    }

    /// Stores a typed callback and returns the id to put on the outgoing call.
    ///
    /// Exactly one of `on_success` and `on_failed` runs, at most once.  A
    /// success payload that does not deserialize into `T` is reported as
    /// `INVALID_RESULT`.
    pub fn register_callback<T, S, F>(
        &self,
        on_success: S,
        on_failed: F,
        options: CallbackOptions,
    ) -> CallbackId
    where
        T: DeserializeOwned + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(ApiCallError) + Send + 'static,
    {
        let api_name = options.api_name;
        let callback = PendingCallback::Typed(Box::new(move |outcome| {
            let outcome = outcome.and_then(|result| {
                result
                    .transform_data_type::<T, Value>()
                    .into_api_result(api_name.as_deref())
            });
            match outcome {
                Ok(data) => on_success(data),
                Err(error) => on_failed(error),
            }
        }));
        self.insert_callback(callback, options.timeout)
    }

    /// Stores a callback receiving the raw wire result.
    pub fn register_raw_callback<F>(&self, on_result: F) -> CallbackId
    where
        F: FnOnce(RawCallResult) + Send + 'static,
    {
        self.insert_callback(PendingCallback::Raw(Box::new(on_result)), None)
    }

    fn insert_callback(&self, callback: PendingCallback, timeout: Option<Duration>) -> CallbackId {
        let id = self.inner.callback_ids.next();
        let timeout = timeout.or(self.inner.config.callback_timeout);

        let mut callbacks = self.inner.callbacks.lock().expect("lock poisoned");
        // Spawned under the lock so the timer cannot observe a missing entry.
        let deadline = timeout.and_then(|timeout| self.spawn_deadline(id, timeout));
        callbacks.insert(id, PendingEntry { callback, deadline });
        id
    }

    fn spawn_deadline(&self, id: CallbackId, timeout: Duration) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(target: TRACE_TARGET, callback_id = id, "no runtime; deadline not armed");
            return None;
        };
        let weak = self.weak();
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_callback(id);
            }
        }))
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Sends a call whose callback has already been registered.
    ///
    /// If the transport refuses the message the pending callback is removed
    /// and rejected with [`ApiCallError::BridgeUnavailable`], so no caller is
    /// left waiting.
    pub fn send_call_message(&self, message: FunctionCallMessage) -> Result<(), TransportError> {
        let id = message.callback_id;
        debug!(target: TRACE_TARGET, name = %message.name, callback_id = id, "sending call");
        let sent = self.inner.bridge.call(&Message::Call(message));
        if let Err(e) = &sent {
            warn!(target: TRACE_TARGET, callback_id = id, "call not sent: {e}");
            self.reject_pending(id);
        }
        sent
    }

    /// A message the transport accepted was lost before reaching the host.
    fn send_failed(&self, message: &Message, error: &TransportError) {
        warn!(
            target: TRACE_TARGET,
            kind = %message.kind(),
            callback_id = message.callback_id(),
            "accepted message not delivered: {error}"
        );
        if let Message::Call(call) = message {
            self.reject_pending(call.callback_id);
        }
    }

    fn reject_pending(&self, id: CallbackId) {
        if let Some(callback) = self.inner.take_callback(id) {
            callback.reject(ApiCallError::BridgeUnavailable);
        }
    }

    /// Calls the function `name` on `target` and resolves with its result.
    ///
    /// The message is sent before this returns; the future only waits.  It
    /// fails with [`ApiCallError::BridgeUnavailable`] if the transport refused
    /// the message or the event center was dropped first.
    pub fn call(
        &self,
        name: impl Into<String>,
        params: Value,
        target: TargetEntity,
    ) -> impl Future<Output = Result<CallResult, ApiCallError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let id = self.insert_callback(
            PendingCallback::Typed(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
            None,
        );
        let message = FunctionCallMessage::new(name, id, target).with_params(params);
        let _ = self.send_call_message(message);
        async move { rx.await.unwrap_or(Err(ApiCallError::BridgeUnavailable)) }
    }

    /// Emits an event to the host.
    pub fn emit_event<P: Serialize>(
        &self,
        name: impl Into<String>,
        params: &P,
    ) -> Result<(), TransportError> {
        let params = serde_json::to_value(params)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        let event = EventMessage::new(name, params);
        debug!(target: TRACE_TARGET, name = %event.name, trace_id = event.callback_id, "emitting event");
        self.inner.bridge.call(&Message::Event(event))
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Routes one inbound message to the matching table.
    pub fn dispatch(&self, message: Message) {
        debug!(target: TRACE_TARGET, kind = %message.kind(), callback_id = message.callback_id(), "dispatching");
        match message {
            Message::Call(call) => self.dispatch_call(call),
            Message::Callback(callback) => self.dispatch_callback(callback),
            Message::Event(event) => self.dispatch_event(event),
        }
    }

    fn dispatch_call(&self, call: FunctionCallMessage) {
        let handler = self
            .inner
            .function_handlers
            .lock()
            .expect("lock poisoned")
            .get(&call.name)
            .map(|(_, handler)| Arc::clone(handler));

        let Some(handler) = handler else {
            warn!(target: TRACE_TARGET, name = %call.name, "no handler for call");
            self.reply(&call, &internal(InternalErrorCallResult::unregistered()));
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(target: TRACE_TARGET, name = %call.name, "no async runtime to run handler");
            self.reply(&call, &CallResult::failed("No async runtime to run handler"));
            return;
        };

        let center = self.clone();
        let params = call.params.clone();
        runtime.spawn(async move {
            let task = tokio::spawn(async move { handler(params).await });
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(target: TRACE_TARGET, name = %call.name, "handler did not complete: {e}");
                    CallResult::failed(format!("Handler for {} did not complete", call.name))
                }
            };
            center.reply(&call, &result);
        });
    }

    fn reply(&self, call: &FunctionCallMessage, result: &CallResult) {
        let callback = CallbackMessage::from_call_message(call, result);
        if let Err(e) = self.inner.bridge.call(&Message::Callback(callback)) {
            warn!(target: TRACE_TARGET, name = %call.name, callback_id = call.callback_id, "reply not sent: {e}");
        }
    }

    fn dispatch_callback(&self, message: CallbackMessage) {
        match self.inner.take_callback(message.callback_id) {
            Some(callback) => callback.resolve(&message),
            None => warn!(
                target: TRACE_TARGET,
                callback_id = message.callback_id,
                "no pending callback; ignoring"
            ),
        }
    }

    fn dispatch_event(&self, event: EventMessage) {
        let snapshot: Vec<EventHandler> = self
            .inner
            .event_handlers
            .lock()
            .expect("lock poisoned")
            .get(&event.name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if snapshot.is_empty() {
            debug!(target: TRACE_TARGET, name = %event.name, "no event handler");
            return;
        }
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event.params))).is_err() {
                error!(target: TRACE_TARGET, name = %event.name, "event handler panicked");
            }
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// Number of calls still waiting for their callback.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.callbacks.lock().expect("lock poisoned").len()
    }

    pub fn has_function_call_handler(&self, name: &str) -> bool {
        self.inner
            .function_handlers
            .lock()
            .expect("lock poisoned")
            .contains_key(name)
    }

    pub fn event_handler_count(&self, name: &str) -> usize {
        self.inner
            .event_handlers
            .lock()
            .expect("lock poisoned")
            .get(name)
            .map_or(0, Vec::len)
    }
}

fn internal(result: InternalErrorCallResult) -> CallResult {
    result.into()
}

/// Unit and null become `{}`; anything else but an object is rejected.
fn into_object(value: Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Object(Default::default())),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

// ── Process-wide default ──────────────────────────────────────────────────────

static DEFAULT_EVENT_CENTER: OnceLock<EventCenter> = OnceLock::new();

/// Installs the process-wide event center used by the pre-defined APIs.
///
/// # Errors
///
/// Returns `center` back if a default was already installed.
pub fn install_default(center: EventCenter) -> Result<(), EventCenter> {
    DEFAULT_EVENT_CENTER.set(center)
}

/// The process-wide event center, if one was installed.
pub fn default_event_center() -> Option<&'static EventCenter> {
    DEFAULT_EVENT_CENTER.get()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
