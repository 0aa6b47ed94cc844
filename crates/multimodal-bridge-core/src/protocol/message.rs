//! The three message shapes that cross the bridge.
//!
//! # Wire format
//!
//! Every message is a plain JSON object with a `type` discriminator:
//!
//! ```text
//! { type: "call",     name, params, callbackId, target: {scope, target, instance?} }
//! { type: "callback", params: {code, msg?, data?}, callbackId }
//! { type: "event",    name, params, timestamp, callbackId }
//! ```
//!
//! - `call`: front-end → host is a function call; host → front-end is a
//!   forwarded call (e.g. the host executing a front-end registered function).
//! - `callback`: the reply to a `call`, matched by `callbackId`.
//! - `event`: a broadcast or forwarded notification, not tied to a call.
//!
//! Parsing is done by hand rather than through a derived tagged enum so that
//! the error says *which* field of *which* message kind was wrong.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::protocol::call_result::{
    parse_call_result_or_invalid, CallResult, InternalErrorCallResult, RawCallResult,
};
use crate::protocol::sequence::IdGenerator;
use crate::protocol::target::TargetEntity;

/// Process-wide trace ids for events created without an explicit id.
static EVENT_TRACE_IDS: IdGenerator = IdGenerator::new();

/// Message kind, the value of the `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call,
    Callback,
    Event,
}

impl MessageType {
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageType::Call => "call",
            MessageType::Callback => "callback",
            MessageType::Event => "event",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(MessageType::Call),
            "callback" => Some(MessageType::Callback),
            "event" => Some(MessageType::Event),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by [`parse_message`] and [`parse_message_str`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MessageParseError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("message must be an object")]
    NotAnObject,

    #[error("message field `type` is missing")]
    MissingType,

    #[error("unrecognized message type: {0}")]
    UnknownType(String),

    #[error("{kind} message field `{field}` is missing")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },

    #[error("{kind} message field `{field}` must be {expected}")]
    WrongType {
        kind: MessageType,
        field: &'static str,
        expected: &'static str,
    },
}

/// A function call addressed to `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallMessage {
    /// Function identifier, possibly namespaced (`"app.getInfo"`).
    pub name: String,
    pub params: Value,
    pub callback_id: u64,
    pub target: TargetEntity,
}

impl FunctionCallMessage {
    /// Creates a call with empty params.
    pub fn new(name: impl Into<String>, callback_id: u64, target: TargetEntity) -> Self {
        Self {
            name: name.into(),
            params: empty_object(),
            callback_id,
            target,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// The reply to a [`FunctionCallMessage`].
///
/// `params` holds the raw call result object untouched; it is only validated
/// when read through [`parsed_params`](Self::parsed_params), so a malformed
/// reply still reaches its pending callback and can be rejected there.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackMessage {
    pub params: Value,
    pub callback_id: u64,
}

impl CallbackMessage {
    pub fn new(callback_id: u64, result: &RawCallResult) -> Self {
        Self {
            params: result.to_value(),
            callback_id,
        }
    }

    /// Builds the reply for `message` carrying `result`.
    pub fn from_call_message<D, E>(message: &FunctionCallMessage, result: &CallResult<D, E>) -> Self
    where
        D: serde::Serialize,
        E: serde::Serialize,
    {
        Self::new(message.callback_id, &result.to_raw())
    }

    /// The typed result; malformed params become `invalid_result()`.
    pub fn parsed_params(&self) -> CallResult {
        parse_call_result_or_invalid(&self.params)
    }

    /// The raw result; malformed params become the raw `invalid_result()`.
    pub fn raw_params(&self) -> RawCallResult {
        serde_json::from_value::<RawCallResult>(self.params.clone()).unwrap_or_else(|_| {
            CallResult::<Value, Value>::from(InternalErrorCallResult::invalid_result()).to_raw()
        })
    }
}

/// An event notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub name: String,
    pub params: Value,
    /// Send time in milliseconds since the Unix epoch; receivers use it to
    /// backfill events newer than a subscription timestamp.
    pub timestamp: u64,
    /// Trace id, unique within the process that created the event.
    pub callback_id: u64,
}

impl EventMessage {
    /// Creates an event stamped with the current time and a fresh trace id.
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self::from_parts(name, params, None, None)
    }

    /// Creates an event, filling in whichever of `timestamp` and
    /// `callback_id` the sender left out.
    pub fn from_parts(
        name: impl Into<String>,
        params: Value,
        timestamp: Option<u64>,
        callback_id: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            timestamp: timestamp.unwrap_or_else(now_millis),
            callback_id: callback_id.unwrap_or_else(|| EVENT_TRACE_IDS.next()),
        }
    }
}

/// Any message that crosses the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(FunctionCallMessage),
    Callback(CallbackMessage),
    Event(EventMessage),
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Call(_) => MessageType::Call,
            Message::Callback(_) => MessageType::Callback,
            Message::Event(_) => MessageType::Event,
        }
    }

    pub fn callback_id(&self) -> u64 {
        match self {
            Message::Call(m) => m.callback_id,
            Message::Callback(m) => m.callback_id,
            Message::Event(m) => m.callback_id,
        }
    }

    /// Function or event name; callbacks have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Message::Call(m) => Some(&m.name),
            Message::Callback(_) => None,
            Message::Event(m) => Some(&m.name),
        }
    }

    /// The canonical wire object.
    pub fn to_plain_object(&self) -> Value {
        match self {
            Message::Call(m) => json!({
                "type": MessageType::Call.as_str(),
                "name": m.name,
                "params": m.params,
                "callbackId": m.callback_id,
                "target": m.target,
            }),
            Message::Callback(m) => json!({
                "type": MessageType::Callback.as_str(),
                "params": m.params,
                "callbackId": m.callback_id,
            }),
            Message::Event(m) => json!({
                "type": MessageType::Event.as_str(),
                "name": m.name,
                "params": m.params,
                "timestamp": m.timestamp,
                "callbackId": m.callback_id,
            }),
        }
    }

    /// The wire object as a compact JSON string.
    pub fn to_json_string(&self) -> String {
        self.to_plain_object().to_string()
    }
}

impl From<FunctionCallMessage> for Message {
    fn from(m: FunctionCallMessage) -> Self {
        Message::Call(m)
    }
}

impl From<CallbackMessage> for Message {
    fn from(m: CallbackMessage) -> Self {
        Message::Callback(m)
    }
}

impl From<EventMessage> for Message {
    fn from(m: EventMessage) -> Self {
        Message::Event(m)
    }
}

/// Parses a wire object into a [`Message`].
///
/// # Errors
///
/// Returns [`MessageParseError`] when the `type` discriminator is missing or
/// unknown, or when a field required by that kind is absent or mistyped:
///
/// | kind       | required                         | optional                   |
/// |------------|----------------------------------|----------------------------|
/// | `call`     | `name`, `callbackId`, `target`   | `params` (default `{}`)    |
/// | `callback` | `params`, `callbackId`           |                            |
/// | `event`    | `name`                           | `params`, `timestamp`, `callbackId` |
pub fn parse_message(input: &Value) -> Result<Message, MessageParseError> {
    let obj = input.as_object().ok_or(MessageParseError::NotAnObject)?;

    let kind = match obj.get("type") {
        None | Some(Value::Null) => return Err(MessageParseError::MissingType),
        Some(Value::String(s)) => {
            MessageType::parse(s).ok_or_else(|| MessageParseError::UnknownType(s.clone()))?
        }
        Some(other) => return Err(MessageParseError::UnknownType(other.to_string())),
    };

    let fields = Fields { obj, kind };
    match kind {
        MessageType::Call => {
            let target_value = fields.required("target")?;
            let target: TargetEntity = serde_json::from_value(target_value.clone())
                .map_err(|_| fields.wrong_type("target", "a target entity"))?;
            Ok(Message::Call(FunctionCallMessage {
                name: fields.string("name")?,
                params: fields.params(false)?,
                callback_id: fields.id("callbackId")?,
                target,
            }))
        }
        MessageType::Callback => Ok(Message::Callback(CallbackMessage {
            params: fields.params(true)?,
            callback_id: fields.id("callbackId")?,
        })),
        MessageType::Event => Ok(Message::Event(EventMessage::from_parts(
            fields.string("name")?,
            fields.params(false)?,
            fields.optional_id("timestamp")?,
            fields.optional_id("callbackId")?,
        ))),
    }
}

/// Parses a JSON string into a [`Message`].
///
/// # Errors
///
/// Returns [`MessageParseError::InvalidJson`] for text that is not JSON, and
/// otherwise the same errors as [`parse_message`].
pub fn parse_message_str(input: &str) -> Result<Message, MessageParseError> {
    let value: Value =
        serde_json::from_str(input).map_err(|e| MessageParseError::InvalidJson(e.to_string()))?;
    parse_message(&value)
}

struct Fields<'a> {
    obj: &'a Map<String, Value>,
    kind: MessageType,
}

impl<'a> Fields<'a> {
    fn required(&self, field: &'static str) -> Result<&'a Value, MessageParseError> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Err(MessageParseError::MissingField {
                kind: self.kind,
                field,
            }),
            Some(v) => Ok(v),
        }
    }

    fn wrong_type(&self, field: &'static str, expected: &'static str) -> MessageParseError {
        MessageParseError::WrongType {
            kind: self.kind,
            field,
            expected,
        }
    }

    fn string(&self, field: &'static str) -> Result<String, MessageParseError> {
        self.required(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.wrong_type(field, "a string"))
    }

    fn id(&self, field: &'static str) -> Result<u64, MessageParseError> {
        as_unsigned(self.required(field)?).ok_or_else(|| self.wrong_type(field, "a non-negative integer"))
    }

    fn optional_id(&self, field: &'static str) -> Result<Option<u64>, MessageParseError> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => as_unsigned(v)
                .map(Some)
                .ok_or_else(|| self.wrong_type(field, "a non-negative integer")),
        }
    }

    fn params(&self, required: bool) -> Result<Value, MessageParseError> {
        let value = if required {
            self.required("params")?
        } else {
            match self.obj.get("params") {
                None | Some(Value::Null) => return Ok(empty_object()),
                Some(v) => v,
            }
        };
        if value.is_object() {
            Ok(value.clone())
        } else {
            Err(self.wrong_type("params", "an object"))
        }
    }
}

fn as_unsigned(value: &Value) -> Option<u64> {
    if let Some(u) = value.as_u64() {
        return Some(u);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
        .map(|f| f as u64)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
