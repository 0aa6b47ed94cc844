//! # multimodal-bridge-core
//!
//! Wire model of the multi-modal JS bridge: the protocol spoken between a
//! front-end running inside a WebView or Lynx view and the native host that
//! embeds it.
//!
//! This crate has no I/O and no async runtime.  It defines:
//!
//! - **`protocol`** – the three message shapes (function call, callback,
//!   event), the typed call result with its stable `{code, msg?, data?}` wire
//!   form, target addressing, and the id generator used to correlate calls
//!   with their callbacks.
//!
//! - **`error`** – [`ApiCallError`], the single error type every failed API
//!   call resolves to.
//!
//! The runtime side (transports, the event center, API factories) lives in
//! the `multimodal-bridge` crate.

pub mod error;
pub mod protocol;

pub use error::ApiCallError;
pub use protocol::call_result::{
    parse_call_result, parse_call_result_or_invalid, CallResult, InternalErrorCallResult,
    RawCallResult, ResultCode,
};
pub use protocol::message::{parse_message, parse_message_str, Message};
pub use protocol::target::{targets, TargetEntity};
