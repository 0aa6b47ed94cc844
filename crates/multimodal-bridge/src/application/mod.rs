//! Application layer: the event center and everything built on it.
//!
//! Nothing here talks to a host directly.  Transports are reached through the
//! [`bridge::Bridge`] port, implemented in `infrastructure`.

pub mod api;
pub mod bridge;
pub mod client_api;
pub mod event_center;
