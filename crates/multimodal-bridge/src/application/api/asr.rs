//! Speech recognition.

use std::future::Future;

use multimodal_bridge_core::ApiCallError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::client_api::{
    ApiFactory, ApiOptions, ClientApi, ClientEvent, EmptyParams, EventOptions, Subscription,
};

pub const START_ASR: &str = "startASR";
pub const STOP_ASR: &str = "stopASR";
pub const ON_ASR_RESULT: &str = "onASRResult";

/// One recognition update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrResult {
    /// Text recognised so far in the current utterance.
    pub text: String,
    /// `Some(true)` once the utterance is complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_finished: Option<bool>,
}

impl AsrResult {
    pub fn is_final(&self) -> bool {
        self.is_finished.unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct AsrApi {
    start: ClientApi<EmptyParams, Value>,
    stop: ClientApi<EmptyParams, Value>,
    result: ClientEvent<AsrResult>,
}

impl AsrApi {
    pub fn new(factory: &ApiFactory) -> Self {
        Self {
            start: factory.create_api(START_ASR, ApiOptions::default()),
            stop: factory.create_api(STOP_ASR, ApiOptions::default()),
            result: factory.create_event(ON_ASR_RESULT, EventOptions::default()),
        }
    }

    /// Starts recognition; resolves with the host's status object.
    pub fn start_asr(&self) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.start.call_empty()
    }

    pub fn stop_asr(&self) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.stop.call_empty()
    }

    /// Listens for recognition updates, streaming and final alike.
    pub fn on_asr_result<F>(&self, handler: F) -> Subscription
    where
        F: Fn(AsrResult) + Send + Sync + 'static,
    {
        self.result.subscribe(handler)
    }
}
