//! Domain layer for the bridge runtime.
//!
//! Pure types with no I/O and no async: configuration lives here.  The wire
//! model itself (messages, call results, errors) is in
//! `multimodal-bridge-core` and re-exported from the crate root.

pub mod config;

pub use config::{BridgeConfig, ConfigError};
