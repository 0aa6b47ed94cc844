//! Pre-defined client APIs of the multi-modal SDK.
//!
//! Each submodule wraps a group of host functions with typed params and
//! results, built through an [`ApiFactory`].  [`MultiModalSdk`] bundles them.

pub mod asr;
pub mod business;
pub mod tts;
pub mod vlm;

use serde::{Deserialize, Serialize};

use crate::application::client_api::ApiFactory;
use crate::application::event_center::default_event_center;

pub use asr::{AsrApi, AsrResult};
pub use business::{BusinessApi, GetQuestionSegmentListParams, GetQuestionSegmentListResult};
pub use tts::{AppendStreamingTtsParams, CreateStreamingTtsParams, StartTtsParams, TtsApi};
pub use vlm::{ChatCompletionAnswer, ChatCompletionParams, CompletionChunk, VlmApi};

/// Handle of a streaming session on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingSession {
    pub streaming_id: String,
}

/// Params of the calls addressing an existing streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingIdParams {
    pub streaming_id: String,
}

impl From<&StreamingSession> for StreamingIdParams {
    fn from(session: &StreamingSession) -> Self {
        Self {
            streaming_id: session.streaming_id.clone(),
        }
    }
}

/// Every pre-defined API, bound to one event center.
#[derive(Clone)]
pub struct MultiModalSdk {
    pub asr: AsrApi,
    pub tts: TtsApi,
    pub vlm: VlmApi,
    pub business: BusinessApi,
}

impl MultiModalSdk {
    pub fn new(factory: &ApiFactory) -> Self {
        Self {
            asr: AsrApi::new(factory),
            tts: TtsApi::new(factory),
            vlm: VlmApi::new(factory),
            business: BusinessApi::new(factory),
        }
    }

    /// Builds the SDK on the process-wide event center, if one is installed.
    pub fn from_default() -> Option<Self> {
        let center = default_event_center()?;
        Some(Self::new(&ApiFactory::new(center.clone())))
    }
}
