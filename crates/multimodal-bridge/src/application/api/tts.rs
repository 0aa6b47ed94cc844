//! Text to speech, one-shot and streaming.

use std::future::Future;

use multimodal_bridge_core::ApiCallError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StreamingIdParams, StreamingSession};
use crate::application::client_api::{ApiFactory, ApiOptions, ClientApi, EmptyParams};

pub const START_TTS: &str = "startTTS";
pub const CANCEL_TTS: &str = "cancelTTS";
pub const CREATE_STREAMING_TTS: &str = "createStreamingTTS";
pub const APPEND_STREAMING_TTS: &str = "appendStreamingTTS";
pub const CANCEL_STREAMING_TTS: &str = "cancelStreamingTTS";

/// Voices known to the host.  Any other string is passed through as is.
pub mod speakers {
    pub const TIANMEIXIAOYUAN: &str = "zh_female_tianmeixiaoyuan_moon_bigtts";
    pub const KAILANGJIEJIE: &str = "zh_female_kailangjiejie_moon_bigtts";
    pub const DONGFANGHAORAN: &str = "zh_male_dongfanghaoran_moon_bigtts";
    pub const JASON: &str = "en_male_jason_conversation_wvae_bigtts";
    pub const SARAH: &str = "en_female_sarah_new_conversation_wvae_bigtts";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTtsParams {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TtsConfig>,
}

impl StartTtsParams {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            config: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.config = Some(TtsConfig {
            speaker: Some(speaker.into()),
        });
        self
    }
}

/// Session settings; the host defaults to the kailangjiejie voice, `pcm`
/// and 24000 Hz.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamingTtsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_sample_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendStreamingTtsParams {
    pub streaming_id: String,
    pub new_text: String,
    /// Ends the session after this text.
    pub is_finish: bool,
}

#[derive(Clone)]
pub struct TtsApi {
    start: ClientApi<StartTtsParams, Value>,
    cancel: ClientApi<EmptyParams, Value>,
    create_streaming: ClientApi<CreateStreamingTtsParams, StreamingSession>,
    append_streaming: ClientApi<AppendStreamingTtsParams, Value>,
    cancel_streaming: ClientApi<StreamingIdParams, Value>,
}

impl TtsApi {
    pub fn new(factory: &ApiFactory) -> Self {
        Self {
            start: factory.create_api(START_TTS, ApiOptions::default()),
            cancel: factory.create_api(CANCEL_TTS, ApiOptions::default()),
            create_streaming: factory.create_api(CREATE_STREAMING_TTS, ApiOptions::default()),
            append_streaming: factory.create_api(APPEND_STREAMING_TTS, ApiOptions::default()),
            cancel_streaming: factory.create_api(CANCEL_STREAMING_TTS, ApiOptions::default()),
        }
    }

    pub fn start_tts(
        &self,
        params: StartTtsParams,
    ) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.start.call(params)
    }

    /// Cancels the current one-shot playback.
    pub fn cancel_tts(&self) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.cancel.call_empty()
    }

    pub fn create_streaming_tts(
        &self,
        params: CreateStreamingTtsParams,
    ) -> impl Future<Output = Result<StreamingSession, ApiCallError>> + Send + 'static {
        self.create_streaming.call(params)
    }

    pub fn append_streaming_tts(
        &self,
        params: AppendStreamingTtsParams,
    ) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.append_streaming.call(params)
    }

    pub fn cancel_streaming_tts(
        &self,
        params: StreamingIdParams,
    ) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.cancel_streaming.call(params)
    }
}
