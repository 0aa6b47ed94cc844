//! # multimodal-bridge
//!
//! Runtime side of the multi-modal JS bridge.
//!
//! A front-end embedded in a WebView or Lynx view talks to its native host
//! through three message kinds: function calls, their callbacks, and events.
//! This crate provides:
//!
//! - **`application::event_center`** – [`EventCenter`], the router that
//!   answers inbound calls, correlates callbacks with pending calls, and fans
//!   events out to subscribers.
//! - **`application::client_api`** – [`ApiFactory`], producing typed
//!   [`ClientApi`]s and [`ClientEvent`]s with reference-counted remote
//!   subscriptions.
//! - **`application::api`** – the pre-defined SDK surface (ASR, TTS, VLM and
//!   business calls).
//! - **`infrastructure`** – transports: WebView, Lynx view, WebSocket and an
//!   in-memory loopback.
//! - **`domain::config`** – [`BridgeConfig`].
//!
//! The wire model is re-exported from `multimodal-bridge-core`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use multimodal_bridge::{ApiFactory, BridgeConfig, EventCenter, MultiModalSdk};
//! use multimodal_bridge::infrastructure::WebSocketBridge;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let bridge = Arc::new(WebSocketBridge::connect("ws://127.0.0.1:9527").await?);
//! let center = EventCenter::new(bridge, BridgeConfig::default());
//! let sdk = MultiModalSdk::new(&ApiFactory::new(center));
//! sdk.asr.start_asr().await?;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::api::MultiModalSdk;
pub use application::bridge::{Bridge, MessageHandler, SendFailureHandler, TransportError};
pub use application::client_api::{
    ApiFactory, ApiOptions, ClientApi, ClientEvent, EmptyParams, EventOptions, Subscription,
};
pub use application::event_center::{
    default_event_center, install_default, CallbackId, CallbackOptions, EventCenter,
    FunctionCallOptions, HandlerError, RegistrationError, Unregister,
};
pub use domain::config::{BridgeConfig, ConfigError};

pub use multimodal_bridge_core::{
    targets, ApiCallError, CallResult, Message, RawCallResult, ResultCode, TargetEntity,
};
