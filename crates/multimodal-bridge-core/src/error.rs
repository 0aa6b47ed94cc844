//! Errors surfaced to code that calls bridge APIs.
//!
//! Every failed API call rejects with exactly one [`ApiCallError`].  The
//! variants split into two families:
//!
//! - **business failures** ([`ApiCallError::CallFailed`]): the remote handler
//!   ran and reported failure, possibly with structured `data`;
//! - **internal failures** (everything else): the bridge, dispatch or
//!   validation machinery failed before a business answer existed.
//!
//! Callers that don't care about the difference use a single `?`.  Every
//! error converts back to a [`CallResult`] with
//! [`to_call_result`](ApiCallError::to_call_result), so a failure caught in
//! one place can be forwarded across the boundary again.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::call_result::{
    CallResult, FailedCallResult, InternalErrorCallResult, ResultCode,
};

/// Message of [`ApiCallError::BridgeUnavailable`].
pub const BRIDGE_UNAVAILABLE_MSG: &str = "Bridge is not available";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiCallError {
    /// The call returned, but in failed state.
    #[error("{}{}", api_prefix(.api_name), .msg)]
    CallFailed {
        msg: String,
        data: Option<Value>,
        api_name: Option<String>,
    },

    #[error("{}unauthorized: {}", api_prefix(.api_name), .msg)]
    Unauthorized { msg: String, api_name: Option<String> },

    #[error("{}unregistered: {}", api_prefix(.api_name), .msg)]
    Unregistered { msg: String, api_name: Option<String> },

    #[error("{}invalid params: {}", api_prefix(.api_name), .msg)]
    InvalidParams { msg: String, api_name: Option<String> },

    #[error("{}invalid result: {}", api_prefix(.api_name), .msg)]
    InvalidResult { msg: String, api_name: Option<String> },

    /// No reply arrived before the deadline.
    #[error("{}timed out: {}", api_prefix(.api_name), .msg)]
    Timeout { msg: String, api_name: Option<String> },

    /// An internal error with a code that has no dedicated variant.
    #[error("{}internal error {}: {}", api_prefix(.api_name), .code, .msg)]
    Internal {
        code: i64,
        msg: String,
        api_name: Option<String>,
    },

    /// The transport itself is unusable.
    #[error("{}", BRIDGE_UNAVAILABLE_MSG)]
    BridgeUnavailable,
}

fn api_prefix(api_name: &Option<String>) -> String {
    match api_name {
        Some(name) => format!("[{name}] "),
        None => String::new(),
    }
}

impl ApiCallError {
    /// Maps an internal error result onto the matching variant.
    pub fn from_internal(result: InternalErrorCallResult, api_name: Option<&str>) -> Self {
        let api_name = api_name.map(str::to_string);
        let msg = result.msg;
        match ResultCode::try_from(result.code) {
            Ok(ResultCode::Unauthorized) => ApiCallError::Unauthorized { msg, api_name },
            Ok(ResultCode::Unregistered) => ApiCallError::Unregistered { msg, api_name },
            Ok(ResultCode::InvalidParams) => ApiCallError::InvalidParams { msg, api_name },
            Ok(ResultCode::InvalidResult) => ApiCallError::InvalidResult { msg, api_name },
            Ok(ResultCode::Timeout) => ApiCallError::Timeout { msg, api_name },
            _ => ApiCallError::Internal {
                code: result.code,
                msg,
                api_name,
            },
        }
    }

    pub fn from_failed(result: FailedCallResult<Value>, api_name: Option<&str>) -> Self {
        ApiCallError::CallFailed {
            msg: result.msg,
            data: result.data,
            api_name: api_name.map(str::to_string),
        }
    }

    /// Unwraps a success, turning anything else into an error.
    pub fn from_call_result<D>(
        result: CallResult<D, Value>,
        api_name: Option<&str>,
    ) -> Result<D, ApiCallError> {
        match result {
            CallResult::Success(s) => Ok(s.data),
            CallResult::Failed(f) => Err(Self::from_failed(f, api_name)),
            CallResult::InternalError(e) => Err(Self::from_internal(e, api_name)),
        }
    }

    /// The wire result code.
    pub fn code(&self) -> i64 {
        match self {
            ApiCallError::CallFailed { .. } | ApiCallError::BridgeUnavailable => {
                ResultCode::Failed.code()
            }
            ApiCallError::Unauthorized { .. } => ResultCode::Unauthorized.code(),
            ApiCallError::Unregistered { .. } => ResultCode::Unregistered.code(),
            ApiCallError::InvalidParams { .. } => ResultCode::InvalidParams.code(),
            ApiCallError::InvalidResult { .. } => ResultCode::InvalidResult.code(),
            ApiCallError::Timeout { .. } => ResultCode::Timeout.code(),
            ApiCallError::Internal { code, .. } => *code,
        }
    }

    pub fn msg(&self) -> &str {
        match self {
            ApiCallError::CallFailed { msg, .. }
            | ApiCallError::Unauthorized { msg, .. }
            | ApiCallError::Unregistered { msg, .. }
            | ApiCallError::InvalidParams { msg, .. }
            | ApiCallError::InvalidResult { msg, .. }
            | ApiCallError::Timeout { msg, .. }
            | ApiCallError::Internal { msg, .. } => msg,
            ApiCallError::BridgeUnavailable => BRIDGE_UNAVAILABLE_MSG,
        }
    }

    /// The API the failing call was made through, for diagnostics.
    pub fn api_name(&self) -> Option<&str> {
        match self {
            ApiCallError::CallFailed { api_name, .. }
            | ApiCallError::Unauthorized { api_name, .. }
            | ApiCallError::Unregistered { api_name, .. }
            | ApiCallError::InvalidParams { api_name, .. }
            | ApiCallError::InvalidResult { api_name, .. }
            | ApiCallError::Timeout { api_name, .. }
            | ApiCallError::Internal { api_name, .. } => api_name.as_deref(),
            ApiCallError::BridgeUnavailable => None,
        }
    }

    /// Attaches an API name, replacing any previous one.
    pub fn with_api_name(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            ApiCallError::CallFailed { api_name, .. }
            | ApiCallError::Unauthorized { api_name, .. }
            | ApiCallError::Unregistered { api_name, .. }
            | ApiCallError::InvalidParams { api_name, .. }
            | ApiCallError::InvalidResult { api_name, .. }
            | ApiCallError::Timeout { api_name, .. }
            | ApiCallError::Internal { api_name, .. } => *api_name = Some(name.into()),
            ApiCallError::BridgeUnavailable => {}
        }
        self
    }

    /// Stable error class name, as reported to JavaScript consumers.
    pub fn name(&self) -> &'static str {
        match self {
            ApiCallError::CallFailed { .. } => "APICallFailedError",
            ApiCallError::Unauthorized { .. } => "APIUnauthorizedError",
            ApiCallError::Unregistered { .. } => "APIUnregisteredError",
            ApiCallError::InvalidParams { .. } => "APIInvalidParamsError",
            ApiCallError::InvalidResult { .. } => "APIInvalidResultError",
            ApiCallError::Timeout { .. } => "APITimeoutError",
            ApiCallError::Internal { .. } => "APICallInternalError",
            ApiCallError::BridgeUnavailable => "MultiModalSDKBridgeError",
        }
    }

    /// `true` for failures of the bridge machinery rather than the handler.
    pub fn is_internal(&self) -> bool {
        !matches!(self, ApiCallError::CallFailed { .. })
    }

    /// The failure payload of a business error, deserialized into `E`.
    ///
    /// Returns `None` for internal errors, failures without data, and data
    /// that does not match `E`.
    pub fn data_as<E: DeserializeOwned>(&self) -> Option<E> {
        match self {
            ApiCallError::CallFailed {
                data: Some(data), ..
            } => serde_json::from_value(data.clone()).ok(),
            _ => None,
        }
    }

    /// Converts back into the result that would have produced this error.
    pub fn to_call_result(&self) -> CallResult {
        match self {
            ApiCallError::CallFailed { msg, data, .. } => CallResult::Failed(FailedCallResult {
                msg: msg.clone(),
                data: data.clone(),
            }),
            ApiCallError::BridgeUnavailable => CallResult::failed(BRIDGE_UNAVAILABLE_MSG),
            other => InternalErrorCallResult::new(other.code(), other.msg()).into(),
        }
    }
}

impl<D> CallResult<D, Value> {
    /// Shorthand for [`ApiCallError::from_call_result`].
    pub fn into_api_result(self, api_name: Option<&str>) -> Result<D, ApiCallError> {
        ApiCallError::from_call_result(self, api_name)
    }
}
