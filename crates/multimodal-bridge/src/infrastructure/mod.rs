//! Transports implementing the [`Bridge`](crate::application::bridge::Bridge)
//! port for each kind of host.

pub mod loopback;
pub mod lynxview;
pub mod webview;
pub mod websocket;

pub use loopback::LoopbackBridge;
pub use lynxview::{LynxBridge, NativeModule};
pub use webview::{HostPoster, MessagePort, WebViewBridge};
pub use websocket::WebSocketBridge;
