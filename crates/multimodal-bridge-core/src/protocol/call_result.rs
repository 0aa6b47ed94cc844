//! Typed outcome of a remote function call.
//!
//! A callback message carries its result as a small JSON object:
//!
//! ```text
//! { "code": 1, "data": { ... } }            success
//! { "code": 0, "msg": "...", "data": {...} } business failure
//! { "code": -2, "msg": "Function not found" } bridge/dispatch failure
//! ```
//!
//! [`RawCallResult`] is that object as-is; [`CallResult`] is the validated,
//! typed form.  The two convert losslessly into each other for every valid
//! result: `parse_call_result(&r.to_raw_value()) == Ok(r)`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Result codes carried in the `code` field of a raw call result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ResultCode {
    /// Function call succeeded.
    Success = 1,
    /// Function call failed; general purpose business failure.
    Failed = 0,
    /// The operation is not permitted for the caller.
    Unauthorized = -1,
    /// No handler is registered for the function name.
    Unregistered = -2,
    /// The input params don't meet the handler's requirements.
    InvalidParams = -3,
    /// The result can't be recognized.
    InvalidResult = -4,
    /// No reply arrived before the local deadline. Never sent by a host.
    Timeout = -5,
    /// The client prohibited the call through its settings.
    SettingDisable = -6,
}

impl ResultCode {
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Message used for an internal error with this code when the host sent none.
    pub const fn default_message(self) -> &'static str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::Failed => "Failed",
            ResultCode::Unauthorized => "Unauthorized",
            ResultCode::Unregistered => error_messages::UNREGISTERED,
            ResultCode::InvalidParams => error_messages::INVALID_PARAMS,
            ResultCode::InvalidResult => error_messages::INVALID_RESULT,
            ResultCode::Timeout => error_messages::TIMEOUT,
            ResultCode::SettingDisable => "Disabled by client setting",
        }
    }
}

impl TryFrom<i64> for ResultCode {
    type Error = i64;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ResultCode::Success),
            0 => Ok(ResultCode::Failed),
            -1 => Ok(ResultCode::Unauthorized),
            -2 => Ok(ResultCode::Unregistered),
            -3 => Ok(ResultCode::InvalidParams),
            -4 => Ok(ResultCode::InvalidResult),
            -5 => Ok(ResultCode::Timeout),
            -6 => Ok(ResultCode::SettingDisable),
            other => Err(other),
        }
    }
}

/// Commonly used pre-defined error messages.
pub mod error_messages {
    pub const UNREGISTERED: &str = "Function not found";
    pub const INVALID_PARAMS: &str = "Invalid params";
    pub const INVALID_RESULT: &str = "Invalid result";
    pub const TIMEOUT: &str = "Call timed out";
}

/// The untyped call result exactly as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCallResult {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RawCallResult {
    /// Converts into the JSON object placed in a callback message's `params`.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("code".to_string(), Value::from(self.code));
        if let Some(msg) = &self.msg {
            obj.insert("msg".to_string(), Value::String(msg.clone()));
        }
        if let Some(data) = &self.data {
            obj.insert("data".to_string(), data.clone());
        }
        Value::Object(obj)
    }
}

/// Errors produced by [`parse_call_result`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallResultParseError {
    #[error("call result must be an object")]
    NotAnObject,

    #[error("call result field `code` is missing")]
    MissingCode,

    #[error("call result field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    /// Positive codes other than SUCCESS have no meaning.
    #[error("unknown call result code: {0}")]
    UnknownCode(i64),
}

/// The call succeeded and carries `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessCallResult<D = Value> {
    pub data: D,
}

/// The remote handler reported a business failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCallResult<E = Value> {
    pub msg: String,
    pub data: Option<E>,
}

/// The bridge or dispatch machinery itself failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalErrorCallResult {
    pub code: i64,
    pub msg: String,
}

impl InternalErrorCallResult {
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    fn from_code(code: ResultCode) -> Self {
        Self::new(code.code(), code.default_message())
    }

    /// Input params don't meet the requirement.
    pub fn invalid_params() -> Self {
        Self::from_code(ResultCode::InvalidParams)
    }

    /// The requested function is not registered.
    pub fn unregistered() -> Self {
        Self::from_code(ResultCode::Unregistered)
    }

    /// The result from the target entity doesn't meet the requirement.
    pub fn invalid_result() -> Self {
        Self::from_code(ResultCode::InvalidResult)
    }

    /// The call is not permitted in the current runtime.
    pub fn runtime_forbidden(msg: impl Into<String>) -> Self {
        Self::new(ResultCode::Unauthorized.code(), msg)
    }

    /// No reply arrived before the caller's deadline.
    pub fn timeout() -> Self {
        Self::from_code(ResultCode::Timeout)
    }

    /// The well-known code, if this is one.
    pub fn result_code(&self) -> Option<ResultCode> {
        ResultCode::try_from(self.code).ok()
    }
}

/// Typed outcome of a remote call.
///
/// `D` is the success payload type and `E` the failure payload type; both
/// default to untyped JSON, which is what comes off the wire.  Use
/// [`CallResult::transform_data_type`] to narrow a wire result to the
/// shape a particular API expects.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult<D = Value, E = Value> {
    Success(SuccessCallResult<D>),
    Failed(FailedCallResult<E>),
    InternalError(InternalErrorCallResult),
}

impl<D, E> CallResult<D, E> {
    pub fn success(data: D) -> Self {
        CallResult::Success(SuccessCallResult { data })
    }

    /// Failure with a reason only.
    pub fn failed(reason: impl Into<String>) -> Self {
        CallResult::Failed(FailedCallResult {
            msg: reason.into(),
            data: None,
        })
    }

    pub fn failed_with_data(reason: impl Into<String>, data: E) -> Self {
        CallResult::Failed(FailedCallResult {
            msg: reason.into(),
            data: Some(data),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }

    /// The wire code this result serializes with.
    pub fn code(&self) -> i64 {
        match self {
            CallResult::Success(_) => ResultCode::Success.code(),
            CallResult::Failed(_) => ResultCode::Failed.code(),
            CallResult::InternalError(e) => e.code,
        }
    }
}

impl<D: Serialize, E: Serialize> CallResult<D, E> {
    /// Converts to the wire representation.
    ///
    /// Payloads travel as JSON objects.  A unit (`null`) success payload is
    /// sent as `{}`; any other non-object success payload degrades to
    /// `InternalErrorCallResult::invalid_result()`.  A non-object failure
    /// payload is dropped and the reason kept.
    pub fn to_raw(&self) -> RawCallResult {
        match self {
            CallResult::Success(s) => match serde_json::to_value(&s.data) {
                Ok(Value::Null) => RawCallResult {
                    code: ResultCode::Success.code(),
                    msg: None,
                    data: Some(empty_object()),
                },
                Ok(data @ Value::Object(_)) => RawCallResult {
                    code: ResultCode::Success.code(),
                    msg: None,
                    data: Some(data),
                },
                Ok(other) => {
                    warn!("success payload is not a JSON object: {other}");
                    CallResult::<Value, Value>::from(InternalErrorCallResult::invalid_result())
                        .to_raw()
                }
                Err(e) => {
                    warn!("success payload is not serializable: {e}");
                    CallResult::<Value, Value>::from(InternalErrorCallResult::invalid_result())
                        .to_raw()
                }
            },
            CallResult::Failed(f) => {
                let data = match f.data.as_ref().map(serde_json::to_value).transpose() {
                    Ok(Some(data @ Value::Object(_))) => Some(data),
                    Ok(Some(Value::Null)) | Ok(None) => None,
                    Ok(Some(other)) => {
                        warn!("failure payload is not a JSON object, dropped: {other}");
                        None
                    }
                    Err(e) => {
                        warn!("failure payload is not serializable: {e}");
                        None
                    }
                };
                RawCallResult {
                    code: ResultCode::Failed.code(),
                    msg: Some(f.msg.clone()),
                    data,
                }
            }
            CallResult::InternalError(e) => RawCallResult {
                code: e.code,
                msg: Some(e.msg.clone()),
                data: None,
            },
        }
    }

    /// Shorthand for `self.to_raw().to_value()`.
    pub fn to_raw_value(&self) -> Value {
        self.to_raw().to_value()
    }
}

impl CallResult<Value, Value> {
    /// Re-validates the payloads against new types.
    ///
    /// - Internal errors pass through unchanged.
    /// - A success or failure payload that deserializes into the target type
    ///   is kept; otherwise the result becomes `invalid_result()`.
    pub fn transform_data_type<D, E>(self) -> CallResult<D, E>
    where
        D: DeserializeOwned,
        E: DeserializeOwned,
    {
        match self {
            CallResult::Success(s) => match serde_json::from_value::<D>(s.data) {
                Ok(data) => CallResult::success(data),
                Err(e) => {
                    warn!("success payload rejected: {e}");
                    InternalErrorCallResult::invalid_result().into()
                }
            },
            CallResult::Failed(f) => match f.data.map(serde_json::from_value::<E>).transpose() {
                Ok(data) => CallResult::Failed(FailedCallResult { msg: f.msg, data }),
                Err(e) => {
                    warn!("failure payload rejected: {e}");
                    InternalErrorCallResult::invalid_result().into()
                }
            },
            CallResult::InternalError(e) => CallResult::InternalError(e),
        }
    }
}

impl<D, E> From<SuccessCallResult<D>> for CallResult<D, E> {
    fn from(result: SuccessCallResult<D>) -> Self {
        CallResult::Success(result)
    }
}

impl<D, E> From<FailedCallResult<E>> for CallResult<D, E> {
    fn from(result: FailedCallResult<E>) -> Self {
        CallResult::Failed(result)
    }
}

impl<D, E> From<InternalErrorCallResult> for CallResult<D, E> {
    fn from(result: InternalErrorCallResult) -> Self {
        CallResult::InternalError(result)
    }
}

impl TryFrom<RawCallResult> for CallResult {
    type Error = CallResultParseError;

    fn try_from(raw: RawCallResult) -> Result<Self, Self::Error> {
        let data = raw.data.and_then(non_null);
        if data.as_ref().is_some_and(|d| !d.is_object()) {
            return Err(CallResultParseError::WrongType {
                field: "data",
                expected: "an object",
            });
        }
        match raw.code {
            1 => Ok(CallResult::success(data.unwrap_or_else(empty_object))),
            0 => Ok(CallResult::Failed(FailedCallResult {
                msg: raw.msg.unwrap_or_default(),
                data,
            })),
            code if code < 0 => {
                let msg = raw.msg.unwrap_or_else(|| {
                    ResultCode::try_from(code)
                        .map(ResultCode::default_message)
                        .unwrap_or("Internal error")
                        .to_string()
                });
                Ok(InternalErrorCallResult::new(code, msg).into())
            }
            code => Err(CallResultParseError::UnknownCode(code)),
        }
    }
}

/// Parses a wire call result.
///
/// # Errors
///
/// Returns [`CallResultParseError`] when `input` is not an object, `code` is
/// missing or not an integer, `msg` is not a string, `data` is not an
/// object, or `code` is a positive value other than SUCCESS.
pub fn parse_call_result(input: &Value) -> Result<CallResult, CallResultParseError> {
    let obj = input.as_object().ok_or(CallResultParseError::NotAnObject)?;

    let code = match obj.get("code") {
        None | Some(Value::Null) => return Err(CallResultParseError::MissingCode),
        Some(v) => as_integer(v).ok_or(CallResultParseError::WrongType {
            field: "code",
            expected: "an integer",
        })?,
    };

    let msg = match obj.get("msg") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(CallResultParseError::WrongType {
                field: "msg",
                expected: "a string",
            })
        }
    };

    CallResult::try_from(RawCallResult {
        code,
        msg,
        data: obj.get("data").cloned(),
    })
}

/// Parses a wire call result, substituting `invalid_result()` for anything
/// malformed.  Use this for every result that crossed the boundary.
pub fn parse_call_result_or_invalid(input: &Value) -> CallResult {
    parse_call_result(input).unwrap_or_else(|e| {
        warn!("malformed call result {input}: {e}");
        InternalErrorCallResult::invalid_result().into()
    })
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    // JavaScript hosts may hand over integral floats such as `1.0`.
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

fn non_null(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
