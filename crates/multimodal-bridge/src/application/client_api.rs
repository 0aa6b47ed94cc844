//! Typed client API and client event factories.
//!
//! [`ApiFactory`] turns a function name into a [`ClientApi<P, R>`]: an async
//! callable that serializes `P`, sends a function call to the client target,
//! and resolves with the reply deserialized into `R`.  It also turns an event
//! name into a [`ClientEvent<P>`] that local code can subscribe to.
//!
//! # Remote subscriptions
//!
//! Non-private events are only delivered by the host after the front-end asks
//! for them with `subscribeEvent`.  The factory keeps one reference count per
//! event name, shared by every `ClientEvent` it created:
//!
//! - the first local subscription sends `subscribeEvent({eventName, timestamp})`;
//! - the last unsubscription sends `unsubscribeEvent({eventName})`.
//!
//! Private events (lifecycle notifications and the like) are pushed by the
//! host unasked and skip both calls.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use multimodal_bridge_core::protocol::{now_millis, targets, FunctionCallMessage};
use multimodal_bridge_core::{ApiCallError, RawCallResult, ResultCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::application::event_center::{CallbackOptions, EventCenter, Unregister};

const TRACE_TARGET: &str = "multimodal_bridge::event_center";

/// Function name of the remote subscription API.
pub const SUBSCRIBE_EVENT: &str = "subscribeEvent";
/// Function name of the remote unsubscription API.
pub const UNSUBSCRIBE_EVENT: &str = "unsubscribeEvent";

/// Parameters of APIs that take none; serializes to `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyParams {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeEventParams {
    /// Which event to subscribe to.
    pub event_name: String,
    /// Receive events sent since this time (ms since the Unix epoch).
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeEventParams {
    pub event_name: String,
}

type ParamsTransform<P> = Arc<dyn Fn(&P) -> Value + Send + Sync>;

/// Extra options for [`ApiFactory::create_api`].
pub struct ApiOptions<P> {
    /// Rewrites the params before they are placed in the call message.
    pub transform_params: Option<ParamsTransform<P>>,
}

impl<P> Default for ApiOptions<P> {
    fn default() -> Self {
        Self {
            transform_params: None,
        }
    }
}

impl<P> ApiOptions<P> {
    pub fn with_transform(transform: impl Fn(&P) -> Value + Send + Sync + 'static) -> Self {
        Self {
            transform_params: Some(Arc::new(transform)),
        }
    }
}

/// Extra options for [`ApiFactory::create_event`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EventOptions {
    /// The host pushes this event without a remote subscription.
    pub is_private: bool,
}

// ── Remote subscription counts ────────────────────────────────────────────────

struct RemoteSubscriptions {
    counts: Mutex<HashMap<String, usize>>,
    subscribe: ClientApi<SubscribeEventParams, Value>,
    unsubscribe: ClientApi<UnsubscribeEventParams, Value>,
}

impl RemoteSubscriptions {
    // The remote call goes out while `counts` is held so that subscribe and
    // unsubscribe frames for one event reach the host in count order.
    fn acquire(&self, event_name: &str) {
        let mut counts = self.counts.lock().expect("lock poisoned");
        let count = counts.entry(event_name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(target: TRACE_TARGET, event = event_name, "subscribing remotely");
            self.subscribe.call_detached(SubscribeEventParams {
                event_name: event_name.to_string(),
                timestamp: now_millis(),
            });
        }
    }

    fn release(&self, event_name: &str) {
        let mut counts = self.counts.lock().expect("lock poisoned");
        match counts.get_mut(event_name) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                counts.remove(event_name);
                debug!(target: TRACE_TARGET, event = event_name, "unsubscribing remotely");
                self.unsubscribe.call_detached(UnsubscribeEventParams {
                    event_name: event_name.to_string(),
                });
            }
            None => {}
        }
    }

    fn count(&self, event_name: &str) -> usize {
        self.counts
            .lock()
            .expect("lock poisoned")
            .get(event_name)
            .copied()
            .unwrap_or(0)
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Creates typed APIs and events bound to one [`EventCenter`].
#[derive(Clone)]
pub struct ApiFactory {
    center: EventCenter,
    remote: Arc<RemoteSubscriptions>,
}

impl ApiFactory {
    pub fn new(center: EventCenter) -> Self {
        let remote = RemoteSubscriptions {
            counts: Mutex::new(HashMap::new()),
            subscribe: ClientApi::new(center.clone(), SUBSCRIBE_EVENT, ApiOptions::default()),
            unsubscribe: ClientApi::new(center.clone(), UNSUBSCRIBE_EVENT, ApiOptions::default()),
        };
        Self {
            center,
            remote: Arc::new(remote),
        }
    }

    pub fn event_center(&self) -> &EventCenter {
        &self.center
    }

    /// Wraps the client function `name` as a typed API.
    pub fn create_api<P, R>(&self, name: impl Into<String>, options: ApiOptions<P>) -> ClientApi<P, R> {
        ClientApi::new(self.center.clone(), name, options)
    }

    /// Wraps the client event `name` as a typed subscription point.
    pub fn create_event<P>(&self, name: impl Into<String>, options: EventOptions) -> ClientEvent<P> {
        ClientEvent {
            name: name.into(),
            is_private: options.is_private,
            center: self.center.clone(),
            remote: Arc::clone(&self.remote),
            _marker: PhantomData,
        }
    }

    /// The `subscribeEvent` API.
    pub fn subscribe_event(&self) -> &ClientApi<SubscribeEventParams, Value> {
        &self.remote.subscribe
    }

    /// The `unsubscribeEvent` API.
    pub fn unsubscribe_event(&self) -> &ClientApi<UnsubscribeEventParams, Value> {
        &self.remote.unsubscribe
    }

    /// Local subscriptions currently holding the remote subscription of
    /// `event_name` open.
    pub fn remote_subscription_count(&self, event_name: &str) -> usize {
        self.remote.count(event_name)
    }
}

// ── ClientApi ─────────────────────────────────────────────────────────────────

/// A client function callable as `api.call(params).await`.
pub struct ClientApi<P, R> {
    name: String,
    center: EventCenter,
    transform: Option<ParamsTransform<P>>,
    _marker: PhantomData<fn() -> R>,
}

impl<P, R> Clone for ClientApi<P, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            center: self.center.clone(),
            transform: self.transform.clone(),
            _marker: PhantomData,
        }
    }
}

impl<P, R> ClientApi<P, R> {
    fn new(center: EventCenter, name: impl Into<String>, options: ApiOptions<P>) -> Self {
        Self {
            name: name.into(),
            center,
            transform: options.transform_params,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<P: Serialize, R> ClientApi<P, R> {
    /// Params as they go on the wire: transformed, then required to be an
    /// object.  Unit and `null` become `{}`.
    fn encode(&self, params: &P) -> Result<Value, ApiCallError> {
        let value = match &self.transform {
            Some(transform) => transform(params),
            None => serde_json::to_value(params).map_err(|e| self.invalid_params(e.to_string()))?,
        };
        match value {
            Value::Null => Ok(Value::Object(Default::default())),
            Value::Object(_) => Ok(value),
            other => Err(self.invalid_params(format!("params must be an object, got {other}"))),
        }
    }

    fn invalid_params(&self, reason: String) -> ApiCallError {
        warn!(target: TRACE_TARGET, api = %self.name, "{reason}");
        ApiCallError::InvalidParams {
            msg: ResultCode::InvalidParams.default_message().to_string(),
            api_name: Some(self.name.clone()),
        }
    }

    fn message(&self, callback_id: u64, params: Value) -> FunctionCallMessage {
        FunctionCallMessage::new(self.name.clone(), callback_id, targets::client_api())
            .with_params(params)
    }

    /// Calls the function and resolves with its raw wire result.
    ///
    /// Used by streaming helpers that inspect the code themselves.
    pub fn call_raw(
        &self,
        params: P,
    ) -> impl Future<Output = Result<RawCallResult, ApiCallError>> + Send + 'static {
        let receiver = self.send_raw(&params);
        async move {
            receiver?
                .await
                .map_err(|_| ApiCallError::BridgeUnavailable)
        }
    }

    fn send_raw(&self, params: &P) -> Result<oneshot::Receiver<RawCallResult>, ApiCallError> {
        let params = self.encode(params)?;
        let (tx, rx) = oneshot::channel();
        let id = self.center.register_raw_callback(move |raw| {
            let _ = tx.send(raw);
        });
        self.center
            .send_call_message(self.message(id, params))
            .map_err(|_| ApiCallError::BridgeUnavailable)?;
        Ok(rx)
    }

    /// Sends the call without waiting; a failed reply is only logged.
    pub fn call_detached(&self, params: P) {
        let params = match self.encode(&params) {
            Ok(params) => params,
            Err(_) => return,
        };
        let name = self.name.clone();
        let id = self.center.register_raw_callback(move |raw| {
            if raw.code != ResultCode::Success.code() {
                warn!(
                    target: TRACE_TARGET,
                    api = %name,
                    code = raw.code,
                    msg = raw.msg.as_deref().unwrap_or_default(),
                    "detached call failed"
                );
            }
        });
        let _ = self.center.send_call_message(self.message(id, params));
    }
}

impl<P, R> ClientApi<P, R>
where
    P: Serialize,
    R: DeserializeOwned + Send + 'static,
{
    /// Calls the function and resolves with its typed result.
    ///
    /// The call message is sent before this returns; the future only waits
    /// for the reply.
    pub fn call(&self, params: P) -> impl Future<Output = Result<R, ApiCallError>> + Send + 'static {
        let receiver = self.send(&params);
        async move {
            receiver?
                .await
                .unwrap_or(Err(ApiCallError::BridgeUnavailable))
        }
    }

    fn send(&self, params: &P) -> Result<oneshot::Receiver<Result<R, ApiCallError>>, ApiCallError> {
        let params = self.encode(params)?;
        let (tx, rx) = oneshot::channel();
        let on_success = Arc::new(Mutex::new(Some(tx)));
        let on_failed = Arc::clone(&on_success);

        let id = self.center.register_callback(
            move |data: R| settle(&on_success, Ok(data)),
            move |error| settle(&on_failed, Err(error)),
            CallbackOptions {
                api_name: Some(self.name.clone()),
                timeout: None,
            },
        );
        self.center
            .send_call_message(self.message(id, params))
            .map_err(|_| ApiCallError::BridgeUnavailable)?;
        Ok(rx)
    }
}

impl<R> ClientApi<EmptyParams, R>
where
    R: DeserializeOwned + Send + 'static,
{
    /// Calls a parameterless function.
    pub fn call_empty(&self) -> impl Future<Output = Result<R, ApiCallError>> + Send + 'static {
        self.call(EmptyParams {})
    }
}

type Settlement<R> = Arc<Mutex<Option<oneshot::Sender<Result<R, ApiCallError>>>>>;

fn settle<R>(slot: &Settlement<R>, outcome: Result<R, ApiCallError>) {
    if let Some(tx) = slot.lock().expect("lock poisoned").take() {
        let _ = tx.send(outcome);
    }
}

// ── ClientEvent ───────────────────────────────────────────────────────────────

/// A client event local code can subscribe to.
pub struct ClientEvent<P> {
    name: String,
    is_private: bool,
    center: EventCenter,
    remote: Arc<RemoteSubscriptions>,
    _marker: PhantomData<fn(P)>,
}

impl<P> Clone for ClientEvent<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            is_private: self.is_private,
            center: self.center.clone(),
            remote: Arc::clone(&self.remote),
            _marker: PhantomData,
        }
    }
}

impl<P: DeserializeOwned + 'static> ClientEvent<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `handler` and, for the first subscriber of a non-private
    /// event, asks the host to start sending it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(P) + Send + Sync + 'static,
    {
        let unregister = self.center.register_event_handler(self.name.clone(), handler);
        let remote = if self.is_private {
            None
        } else {
            self.remote.acquire(&self.name);
            Some(Arc::clone(&self.remote))
        };
        Subscription {
            event_name: self.name.clone(),
            unregister,
            remote,
            active: AtomicBool::new(true),
        }
    }
}

/// A live event subscription.
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[must_use = "the subscription stays active until `unsubscribe` is called"]
pub struct Subscription {
    event_name: String,
    unregister: Unregister,
    remote: Option<Arc<RemoteSubscriptions>>,
    active: AtomicBool,
}

impl Subscription {
    /// Removes the handler.  Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.unregister.unregister();
        if let Some(remote) = &self.remote {
            remote.release(&self.event_name);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bridge::Bridge;
    use crate::domain::config::BridgeConfig;
    use crate::infrastructure::loopback::LoopbackBridge;
    use multimodal_bridge_core::protocol::{CallbackMessage, EventMessage};
    use multimodal_bridge_core::{CallResult, Message};
    use serde_json::json;

    fn setup() -> (Arc<LoopbackBridge>, ApiFactory) {
        let bridge = Arc::new(LoopbackBridge::new());
        let config = BridgeConfig {
            callback_timeout: None,
            ..BridgeConfig::default()
        };
        let center = EventCenter::new(Arc::clone(&bridge) as Arc<dyn Bridge>, config);
        (bridge, ApiFactory::new(center))
    }

    fn sent_calls(bridge: &LoopbackBridge) -> Vec<FunctionCallMessage> {
        bridge
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::Call(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    fn reply(bridge: &LoopbackBridge, callback_id: u64, result: CallResult) {
        bridge.inject(CallbackMessage::new(callback_id, &result.to_raw()).into());
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Query {
        image_id: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: String,
    }

    #[tokio::test]
    async fn test_call_sends_to_client_target_and_resolves_typed() {
        // Arrange
        let (bridge, factory) = setup();
        let api: ClientApi<Query, Answer> = factory.create_api("ask", ApiOptions::default());

        // Act
        let pending = api.call(Query {
            image_id: "img-1".into(),
        });
        let call = sent_calls(&bridge).remove(0);
        reply(&bridge, call.callback_id, CallResult::success(json!({"answer": "42"})));

        // Assert
        assert_eq!(call.name, "ask");
        assert_eq!(call.target, targets::client_api());
        assert_eq!(call.params, json!({"imageId": "img-1"}));
        assert_eq!(pending.await.unwrap(), Answer { answer: "42".into() });
    }

    #[tokio::test]
    async fn test_empty_params_are_sent_as_empty_object() {
        let (bridge, factory) = setup();
        let api: ClientApi<EmptyParams, Value> = factory.create_api("closeApp", ApiOptions::default());
        let unit: ClientApi<(), Value> = factory.create_api("stopASR", ApiOptions::default());

        let _a = api.call_empty();
        let _b = unit.call(());

        let calls = sent_calls(&bridge);
        assert_eq!(calls[0].params, json!({}));
        assert_eq!(calls[1].params, json!({}));
    }

    #[tokio::test]
    async fn test_transform_params_rewrites_payload() {
        let (bridge, factory) = setup();
        let api: ClientApi<String, Value> = factory.create_api(
            "startTTS",
            ApiOptions::with_transform(|text: &String| json!({"text": text})),
        );

        let _pending = api.call("hello".to_string());

        assert_eq!(sent_calls(&bridge)[0].params, json!({"text": "hello"}));
    }

    #[tokio::test]
    async fn test_non_object_params_are_rejected_locally() {
        let (bridge, factory) = setup();
        let api: ClientApi<u32, Value> = factory.create_api("count", ApiOptions::default());

        let result = api.call(5).await;

        assert!(matches!(result, Err(ApiCallError::InvalidParams { .. })));
        assert!(bridge.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reply_becomes_call_failed_with_api_name() {
        let (bridge, factory) = setup();
        let api: ClientApi<EmptyParams, Value> = factory.create_api("startASR", ApiOptions::default());

        let pending = api.call_empty();
        let id = sent_calls(&bridge)[0].callback_id;
        reply(&bridge, id, CallResult::failed("mic busy"));

        let error = pending.await.unwrap_err();
        assert_eq!(error.to_string(), "[startASR] mic busy");
        assert!(!error.is_internal());
    }

    #[tokio::test]
    async fn test_unavailable_bridge_rejects_with_bridge_unavailable() {
        let (bridge, factory) = setup();
        bridge.set_available(false);
        let api: ClientApi<EmptyParams, Value> = factory.create_api("closeApp", ApiOptions::default());

        let result = api.call_empty().await;

        assert_eq!(result, Err(ApiCallError::BridgeUnavailable));
        assert_eq!(factory.event_center().pending_callbacks(), 0);
    }

    #[tokio::test]
    async fn test_call_raw_returns_wire_result() {
        let (bridge, factory) = setup();
        let api: ClientApi<EmptyParams, Value> =
            factory.create_api("readCompletionStreaming", ApiOptions::default());

        let pending = api.call_raw(EmptyParams {});
        let id = sent_calls(&bridge)[0].callback_id;
        reply(&bridge, id, CallResult::failed("gone"));

        let raw = pending.await.unwrap();
        assert_eq!(raw.code, 0);
        assert_eq!(raw.msg.as_deref(), Some("gone"));
    }

    #[test]
    fn test_first_subscriber_subscribes_remotely_last_unsubscribes() {
        // Arrange
        let (bridge, factory) = setup();
        let event: ClientEvent<Value> = factory.create_event("onASRResult", EventOptions::default());

        // Act
        let a = event.subscribe(|_| {});
        let b = event.subscribe(|_| {});
        a.unsubscribe();
        let after_first_release = sent_calls(&bridge).len();
        b.unsubscribe();

        // Assert
        let calls = sent_calls(&bridge);
        assert_eq!(after_first_release, 1);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, SUBSCRIBE_EVENT);
        assert_eq!(calls[0].params["eventName"], "onASRResult");
        assert!(calls[0].params["timestamp"].is_u64());
        assert_eq!(calls[1].name, UNSUBSCRIBE_EVENT);
        assert_eq!(calls[1].params, json!({"eventName": "onASRResult"}));
    }

    #[test]
    fn test_counts_are_shared_across_events_of_one_factory() {
        let (bridge, factory) = setup();
        let first: ClientEvent<Value> = factory.create_event("tick", EventOptions::default());
        let second: ClientEvent<Value> = factory.create_event("tick", EventOptions::default());

        let _a = first.subscribe(|_| {});
        let _b = second.subscribe(|_| {});

        assert_eq!(sent_calls(&bridge).len(), 1);
        assert_eq!(factory.remote_subscription_count("tick"), 2);
    }

    #[test]
    fn test_private_event_never_touches_remote_subscription() {
        let (bridge, factory) = setup();
        let event: ClientEvent<Value> =
            factory.create_event("onHide", EventOptions { is_private: true });

        let sub = event.subscribe(|_| {});
        sub.unsubscribe();

        assert!(bridge.sent().is_empty());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (bridge, factory) = setup();
        let event: ClientEvent<Value> = factory.create_event("tick", EventOptions::default());
        let keep = event.subscribe(|_| {});
        let sub = event.subscribe(|_| {});

        sub.unsubscribe();
        sub.unsubscribe();

        assert!(!sub.is_active());
        assert!(keep.is_active());
        assert_eq!(factory.event_center().event_handler_count("tick"), 1);
        assert_eq!(factory.remote_subscription_count("tick"), 1);
        assert_eq!(sent_calls(&bridge).len(), 1);
    }

    #[test]
    fn test_concurrent_subscribers_keep_remote_frames_in_count_order() {
        // Arrange
        let (bridge, factory) = setup();
        let event: ClientEvent<Value> = factory.create_event("tick", EventOptions::default());

        // Act
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        event.subscribe(|_| {}).unsubscribe();
                    }
                });
            }
        });

        // Assert: frames alternate subscribe/unsubscribe and end unsubscribed.
        let names: Vec<String> = sent_calls(&bridge).into_iter().map(|c| c.name).collect();
        assert!(!names.is_empty());
        for (i, name) in names.iter().enumerate() {
            let expected = if i % 2 == 0 { SUBSCRIBE_EVENT } else { UNSUBSCRIBE_EVENT };
            assert_eq!(name, expected, "frame {i} out of order");
        }
        assert_eq!(names.last().map(String::as_str), Some(UNSUBSCRIBE_EVENT));
        assert_eq!(factory.remote_subscription_count("tick"), 0);
    }

    #[derive(Debug, Deserialize, PartialEq, Clone)]
    #[serde(rename_all = "camelCase")]
    struct AsrText {
        text: String,
        is_finished: Option<bool>,
    }

    #[test]
    fn test_subscribed_handler_receives_typed_params() {
        let (bridge, factory) = setup();
        let event: ClientEvent<AsrText> = factory.create_event("onASRResult", EventOptions::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = event.subscribe(move |p| sink.lock().unwrap().push(p));

        bridge.inject(EventMessage::new("onASRResult", json!({"text": "a"})).into());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![AsrText {
                text: "a".into(),
                is_finished: None
            }]
        );
    }

    #[tokio::test]
    async fn test_subscribe_event_api_is_callable_directly() {
        let (bridge, factory) = setup();

        let pending = factory.subscribe_event().call(SubscribeEventParams {
            event_name: "x".into(),
            timestamp: 0,
        });
        let id = sent_calls(&bridge)[0].callback_id;
        reply(&bridge, id, CallResult::success(json!({})));

        assert_eq!(pending.await, Ok(json!({})));
    }
}
