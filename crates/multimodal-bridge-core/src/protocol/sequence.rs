//! Monotonic id generator for callback ids and event trace ids.
//!
//! Every [`FunctionCallMessage`](crate::protocol::message::FunctionCallMessage)
//! carries a *callback id* that the host echoes back in the matching
//! [`CallbackMessage`](crate::protocol::message::CallbackMessage).  The id is
//! the only correlation key between a request and its reply, so two
//! outstanding calls must never share one.
//!
//! # Thread safety
//!
//! The generator uses `AtomicU64` internally, so `next()` may be called from
//! any thread (for example from a WebSocket reader task and from application
//! code at the same time) without producing the same value twice.

use std::sync::atomic::{AtomicU64, Ordering};

/// The first id handed out by a fresh (or reset) generator.
///
/// Zero is never used so a host that sends `callbackId: 0` for "no callback"
/// can never collide with a real pending call.
pub const FIRST_ID: u64 = 1;

/// A thread-safe, monotonically increasing id generator.
///
/// # Examples
///
/// ```rust
/// use multimodal_bridge_core::protocol::IdGenerator;
///
/// let ids = IdGenerator::new();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ids.reset();
/// assert_eq!(ids.next(), 1);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    inner: AtomicU64,
}

impl IdGenerator {
    /// Creates a new generator whose first id is [`FIRST_ID`].
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(FIRST_ID),
        }
    }

    /// Returns the next id and atomically advances the generator.
    ///
    /// Wraps from `u64::MAX` to 0 without panicking; in practice a session
    /// never gets anywhere near that.
    pub fn next(&self) -> u64 {
        // `fetch_add` returns the value *before* the addition.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the id the next call to [`next`](Self::next) will hand out.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }

    /// Rewinds the generator to [`FIRST_ID`].
    ///
    /// Only meant for test isolation: resetting while calls are in flight can
    /// hand out an id that is still pending.
    pub fn reset(&self) {
        self.inner.store(FIRST_ID, Ordering::Relaxed);
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
