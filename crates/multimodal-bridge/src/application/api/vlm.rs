//! Vision-language model completions.
//!
//! The streaming variant is a session: `chatCompletionStreaming` opens it and
//! returns a streaming id, `readCompletionStreaming` returns the text produced
//! since the previous read, and `cancelCompletionStreaming` aborts it.
//! [`VlmApi::completion_stream`] drives that loop as a [`Stream`].

use std::future::Future;

use futures_util::stream::{self, Stream};
use multimodal_bridge_core::ApiCallError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StreamingIdParams, StreamingSession};
use crate::application::client_api::{ApiFactory, ApiOptions, ClientApi};

pub const CHAT_COMPLETION: &str = "chatCompletion";
pub const CHAT_COMPLETION_STREAMING: &str = "chatCompletionStreaming";
pub const READ_COMPLETION_STREAMING: &str = "readCompletionStreaming";
pub const CANCEL_COMPLETION_STREAMING: &str = "cancelCompletionStreaming";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCompletionParams {
    /// Image as base64, optionally a `data:` URL.
    pub base64_image: String,
    pub query: String,
    /// System prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionAnswer {
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionChunk {
    pub new_text: String,
    pub is_finished: bool,
}

enum StreamState {
    Start(ChatCompletionParams),
    Reading(String),
    Done,
}

#[derive(Clone)]
pub struct VlmApi {
    chat: ClientApi<ChatCompletionParams, ChatCompletionAnswer>,
    chat_streaming: ClientApi<ChatCompletionParams, StreamingSession>,
    read_streaming: ClientApi<StreamingIdParams, CompletionChunk>,
    cancel_streaming: ClientApi<StreamingIdParams, Value>,
}

impl VlmApi {
    pub fn new(factory: &ApiFactory) -> Self {
        Self {
            chat: factory.create_api(CHAT_COMPLETION, ApiOptions::default()),
            chat_streaming: factory.create_api(CHAT_COMPLETION_STREAMING, ApiOptions::default()),
            read_streaming: factory.create_api(READ_COMPLETION_STREAMING, ApiOptions::default()),
            cancel_streaming: factory.create_api(CANCEL_COMPLETION_STREAMING, ApiOptions::default()),
        }
    }

    /// Asks a question about an image and waits for the whole answer.
    pub fn chat_completion(
        &self,
        params: ChatCompletionParams,
    ) -> impl Future<Output = Result<ChatCompletionAnswer, ApiCallError>> + Send + 'static {
        self.chat.call(params)
    }

    pub fn chat_completion_streaming(
        &self,
        params: ChatCompletionParams,
    ) -> impl Future<Output = Result<StreamingSession, ApiCallError>> + Send + 'static {
        self.chat_streaming.call(params)
    }

    pub fn read_completion_streaming(
        &self,
        params: StreamingIdParams,
    ) -> impl Future<Output = Result<CompletionChunk, ApiCallError>> + Send + 'static {
        self.read_streaming.call(params)
    }

    pub fn cancel_completion_streaming(
        &self,
        params: StreamingIdParams,
    ) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.cancel_streaming.call(params)
    }

    /// Opens a streaming completion and yields its text as it arrives.
    ///
    /// Empty reads are skipped.  The stream ends after the chunk marked
    /// finished, or after the first error.  Dropping the stream early leaves
    /// the host session open; cancel it with
    /// [`cancel_completion_streaming`](Self::cancel_completion_streaming).
    pub fn completion_stream(
        &self,
        params: ChatCompletionParams,
    ) -> impl Stream<Item = Result<String, ApiCallError>> + Send + 'static {
        let open = self.chat_streaming.clone();
        let read = self.read_streaming.clone();

        stream::unfold(StreamState::Start(params), move |state| {
            let open = open.clone();
            let read = read.clone();
            async move {
                let streaming_id = match state {
                    StreamState::Done => return None,
                    StreamState::Start(params) => match open.call(params).await {
                        Ok(session) => session.streaming_id,
                        Err(e) => return Some((Err(e), StreamState::Done)),
                    },
                    StreamState::Reading(streaming_id) => streaming_id,
                };

                loop {
                    let chunk = match read
                        .call(StreamingIdParams {
                            streaming_id: streaming_id.clone(),
                        })
                        .await
                    {
                        Ok(chunk) => chunk,
                        Err(e) => return Some((Err(e), StreamState::Done)),
                    };
                    if chunk.is_finished {
                        return (!chunk.new_text.is_empty())
                            .then(|| (Ok(chunk.new_text), StreamState::Done));
                    }
                    if !chunk.new_text.is_empty() {
                        return Some((Ok(chunk.new_text), StreamState::Reading(streaming_id)));
                    }
                }
            }
        })
    }
}
