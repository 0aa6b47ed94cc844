//! Both ends of the bridge in one process: a front-end event center and a
//! host event center joined by a pair of loopback transports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use multimodal_bridge::application::api::vlm::{
    ChatCompletionParams, CompletionChunk, CHAT_COMPLETION_STREAMING, READ_COMPLETION_STREAMING,
};
use multimodal_bridge::application::api::{AsrResult, StreamingIdParams, StreamingSession};
use multimodal_bridge::application::client_api::{SubscribeEventParams, SUBSCRIBE_EVENT};
use multimodal_bridge::infrastructure::LoopbackBridge;
use multimodal_bridge::{
    ApiCallError, ApiFactory, ApiOptions, Bridge, BridgeConfig, ClientApi, ClientEvent,
    EmptyParams, EventCenter, EventOptions, FunctionCallOptions, HandlerError, MultiModalSdk,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

struct Harness {
    front: ApiFactory,
    host: EventCenter,
}

fn harness_with(config: BridgeConfig) -> Harness {
    let (front_bridge, host_bridge) = LoopbackBridge::pair();
    let front = EventCenter::new(front_bridge as Arc<dyn Bridge>, config.clone());
    let host = EventCenter::new(host_bridge as Arc<dyn Bridge>, config);
    Harness {
        front: ApiFactory::new(front),
        host,
    }
}

fn harness() -> Harness {
    harness_with(BridgeConfig {
        callback_timeout: None,
        ..BridgeConfig::default()
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Echo {
    value: String,
}

#[tokio::test]
async fn test_echo_roundtrip() {
    // Arrange
    let h = harness();
    h.host
        .register_function_call_handler(
            "echo",
            |p: Echo| async move { Ok::<_, HandlerError>(p) },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let echo: ClientApi<Echo, Echo> = h.front.create_api("echo", ApiOptions::default());

    // Act
    let result = echo
        .call(Echo {
            value: "hello".into(),
        })
        .await;

    // Assert
    assert_eq!(
        result,
        Ok(Echo {
            value: "hello".into()
        })
    );
    assert_eq!(h.front.event_center().pending_callbacks(), 0);
}

#[tokio::test]
async fn test_unregistered_function_rejects_with_unregistered() {
    let h = harness();
    let api: ClientApi<EmptyParams, Value> = h.front.create_api("nobody", ApiOptions::default());

    let error = api.call_empty().await.unwrap_err();

    assert!(matches!(error, ApiCallError::Unregistered { .. }));
    assert_eq!(error.code(), -2);
    assert_eq!(error.api_name(), Some("nobody"));
}

#[tokio::test]
async fn test_handler_failure_carries_typed_payload() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Quota {
        remaining: u32,
    }

    let h = harness();
    h.host
        .register_function_call_handler(
            "chatCompletion",
            |_: Value| async move {
                Err::<Value, _>(HandlerError::new("quota exhausted").with_data(&json!({"remaining": 0})))
            },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let api: ClientApi<Value, Value> = h.front.create_api("chatCompletion", ApiOptions::default());

    let error = api.call(json!({})).await.unwrap_err();

    assert_eq!(error.msg(), "quota exhausted");
    assert_eq!(error.data_as::<Quota>(), Some(Quota { remaining: 0 }));
}

#[tokio::test]
async fn test_host_handler_can_forward_a_front_end_failure() {
    // The host calls back into the front-end while answering.
    let h = harness();
    let host_factory = ApiFactory::new(h.host.clone());
    let inner: ClientApi<EmptyParams, Value> = host_factory.create_api("missing", ApiOptions::default());
    h.host
        .register_function_call_handler(
            "outer",
            move |_: Value| {
                let pending = inner.call_empty();
                async move { Ok::<Value, HandlerError>(pending.await?) }
            },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let outer: ClientApi<EmptyParams, Value> = h.front.create_api("outer", ApiOptions::default());

    let error = outer.call_empty().await.unwrap_err();

    assert!(matches!(error, ApiCallError::CallFailed { .. }));
    assert_eq!(error.msg(), "Function not found");
}

#[tokio::test]
async fn test_two_listeners_receive_event_in_registration_order() {
    // Arrange
    let h = harness();
    let event: ClientEvent<AsrResult> = h.front.create_event("onASRResult", EventOptions::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (Arc::clone(&log), Arc::clone(&log));
    let _a = event.subscribe(move |r| first.lock().unwrap().push(format!("a:{}", r.text)));
    let _b = event.subscribe(move |r| second.lock().unwrap().push(format!("b:{}", r.text)));

    // Act
    h.host.emit_event("onASRResult", &json!({"text": "a"})).unwrap();

    // Assert
    assert_eq!(*log.lock().unwrap(), vec!["a:a", "b:a"]);
}

#[tokio::test]
async fn test_first_subscription_reaches_host_once() {
    let h = harness();
    let subscribed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&subscribed);
    h.host
        .register_function_call_handler(
            SUBSCRIBE_EVENT,
            move |p: SubscribeEventParams| {
                sink.lock().unwrap().push(p.event_name);
                async move { Ok::<_, HandlerError>(json!({})) }
            },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let event: ClientEvent<Value> = h.front.create_event("onASRResult", EventOptions::default());

    let a = event.subscribe(|_| {});
    let b = event.subscribe(|_| {});
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    assert_eq!(*subscribed.lock().unwrap(), vec!["onASRResult".to_string()]);
    a.unsubscribe();
    b.unsubscribe();
}

#[tokio::test]
async fn test_sdk_completion_stream_yields_chunks_until_finished() {
    // Arrange
    let h = harness();
    h.host
        .register_function_call_handler(
            CHAT_COMPLETION_STREAMING,
            |_: ChatCompletionParams| async move {
                Ok::<_, HandlerError>(StreamingSession {
                    streaming_id: "s-1".into(),
                })
            },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);
    h.host
        .register_function_call_handler(
            READ_COMPLETION_STREAMING,
            move |p: StreamingIdParams| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_eq!(p.streaming_id, "s-1");
                    let (text, finished) = match n {
                        0 => ("A cat", false),
                        1 => ("", false),
                        _ => (" on a mat.", true),
                    };
                    let chunk = CompletionChunk {
                        new_text: text.to_string(),
                        is_finished: finished,
                    };
                    Ok::<_, HandlerError>(chunk)
                }
            },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let sdk = MultiModalSdk::new(&h.front);

    // Act
    let chunks: Vec<_> = sdk
        .vlm
        .completion_stream(ChatCompletionParams {
            base64_image: "data:image/png;base64,AAAA".into(),
            query: "what is this?".into(),
            prompt: None,
        })
        .collect()
        .await;

    // Assert
    assert_eq!(chunks, vec![Ok("A cat".to_string()), Ok(" on a mat.".to_string())]);
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sdk_stream_stops_after_error() {
    let h = harness();
    let sdk = MultiModalSdk::new(&h.front);

    let chunks: Vec<_> = sdk
        .vlm
        .completion_stream(ChatCompletionParams {
            base64_image: String::new(),
            query: "q".into(),
            prompt: None,
        })
        .collect()
        .await;

    assert_eq!(chunks.len(), 1);
    assert!(matches!(chunks[0], Err(ApiCallError::Unregistered { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out() {
    // Arrange
    let h = harness_with(BridgeConfig {
        callback_timeout: Some(Duration::from_secs(2)),
        ..BridgeConfig::default()
    });
    h.host
        .register_function_call_handler(
            "stall",
            |_: Value| async move {
                std::future::pending::<()>().await;
                Ok::<Value, HandlerError>(json!({}))
            },
            FunctionCallOptions::default(),
        )
        .unwrap();
    let api: ClientApi<EmptyParams, Value> = h.front.create_api("stall", ApiOptions::default());

    // Act
    let error = api.call_empty().await.unwrap_err();

    // Assert
    assert!(matches!(error, ApiCallError::Timeout { .. }));
    assert_eq!(error.code(), -5);
    assert_eq!(h.front.event_center().pending_callbacks(), 0);
}

#[tokio::test]
async fn test_unavailable_transport_rejects_without_hanging() {
    let bridge = Arc::new(LoopbackBridge::new());
    bridge.set_available(false);
    let center = EventCenter::new(bridge as Arc<dyn Bridge>, BridgeConfig::default());
    let sdk = MultiModalSdk::new(&ApiFactory::new(center));

    let result = sdk.business.close_app().await;

    assert_eq!(result, Err(ApiCallError::BridgeUnavailable));
    assert_eq!(
        result.unwrap_err().to_string(),
        "Bridge is not available"
    );
}
