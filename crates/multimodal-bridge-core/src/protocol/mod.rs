//! Protocol module: message shapes, call results, addressing and ids.

pub mod call_result;
pub mod message;
pub mod sequence;
pub mod target;

pub use call_result::{
    error_messages, parse_call_result, parse_call_result_or_invalid, CallResult,
    CallResultParseError, FailedCallResult, InternalErrorCallResult, RawCallResult, ResultCode,
    SuccessCallResult,
};
pub use message::{
    now_millis, parse_message, parse_message_str, CallbackMessage, EventMessage,
    FunctionCallMessage, Message, MessageParseError, MessageType,
};
pub use sequence::IdGenerator;
pub use target::{is_target_entity, targets, TargetEntity};
