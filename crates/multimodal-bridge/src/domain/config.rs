//! Bridge configuration.
//!
//! [`BridgeConfig`] is a plain struct with sensible defaults.  It can be built
//! in code, loaded from a TOML file, or (in the `mmbridge` binary) filled in
//! from CLI arguments and environment variables.
//!
//! # TOML format
//!
//! ```toml
//! # Reject calls the host has not answered after this many milliseconds.
//! # 0 disables the deadline.
//! callback_timeout_ms = 30000
//! # Calls buffered by the Lynx transport before the ready handshake.
//! lynx_queue_limit = 256
//! # Host endpoint for the WebSocket transport.
//! host_url = "ws://127.0.0.1:9527"
//! ```
//!
//! Every field is optional; missing fields take their default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default deadline for a pending callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of calls the Lynx transport buffers before its handshake.
pub const DEFAULT_LYNX_QUEUE_LIMIT: usize = 256;

/// Default WebSocket host endpoint.
pub const DEFAULT_HOST_URL: &str = "ws://127.0.0.1:9527";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime configuration shared by the event center and the transports.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// How long a call may stay unanswered before it is rejected with a
    /// timeout.  `None` keeps calls pending until the host replies.
    pub callback_timeout: Option<Duration>,

    /// Maximum number of calls the Lynx transport queues while waiting for
    /// the ready handshake.  Calls beyond it fail as unavailable.
    pub lynx_queue_limit: usize,

    /// Endpoint of the host for the WebSocket transport.
    pub host_url: String,
}

impl Default for BridgeConfig {
    /// | Field            | Default               |
    /// |------------------|-----------------------|
    /// | callback_timeout | 30 seconds            |
    /// | lynx_queue_limit | 256                   |
    /// | host_url         | `ws://127.0.0.1:9527` |
    fn default() -> Self {
        Self {
            callback_timeout: Some(DEFAULT_CALLBACK_TIMEOUT),
            lynx_queue_limit: DEFAULT_LYNX_QUEUE_LIMIT,
            host_url: DEFAULT_HOST_URL.to_string(),
        }
    }
}

/// On-disk shape; durations are plain integers there.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_callback_timeout_ms")]
    callback_timeout_ms: u64,
    #[serde(default = "default_lynx_queue_limit")]
    lynx_queue_limit: usize,
    #[serde(default = "default_host_url")]
    host_url: String,
}

fn default_callback_timeout_ms() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT.as_millis() as u64
}

fn default_lynx_queue_limit() -> usize {
    DEFAULT_LYNX_QUEUE_LIMIT
}

fn default_host_url() -> String {
    DEFAULT_HOST_URL.to_string()
}

impl From<ConfigFile> for BridgeConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            callback_timeout: (file.callback_timeout_ms > 0)
                .then(|| Duration::from_millis(file.callback_timeout_ms)),
            lynx_queue_limit: file.lynx_queue_limit,
            host_url: file.host_url,
        }
    }
}

impl BridgeConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML, mistyped values or
    /// unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.into())
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// errors of [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
