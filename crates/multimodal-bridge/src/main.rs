//! `mmbridge`: command-line client for a multi-modal bridge host.
//!
//! Connects to a host over WebSocket and either calls one client function or
//! listens to one event.  Handy for poking at a development host without a
//! front-end.
//!
//! # Usage
//!
//! ```text
//! mmbridge [OPTIONS] <COMMAND>
//!
//! Commands:
//!   call    <NAME> [--params <JSON>]            Call a client function
//!   listen  <EVENT> [--private] [--count <N>]   Print events as they arrive
//!
//! Options:
//!   --config     <PATH>  TOML configuration file
//!   --host-url   <URL>   WebSocket endpoint of the host
//!   --timeout-ms <MS>    Callback deadline, 0 disables it
//!   --trace              Debug-level logs for the bridge internals
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable             | Description                  |
//! |----------------------|------------------------------|
//! | `MMBRIDGE_CONFIG`    | Configuration file path      |
//! | `MMBRIDGE_HOST_URL`  | Host WebSocket endpoint      |
//! | `MMBRIDGE_TIMEOUT_MS`| Callback deadline in ms      |
//!
//! CLI args take precedence over the environment, which takes precedence over
//! the configuration file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use multimodal_bridge::infrastructure::WebSocketBridge;
use multimodal_bridge::{
    ApiFactory, ApiOptions, Bridge, BridgeConfig, ClientApi, ClientEvent, EventCenter,
    EventOptions,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "mmbridge",
    about = "Call functions and listen to events on a multi-modal bridge host",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "MMBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket endpoint of the host, e.g. `ws://127.0.0.1:9527`.
    #[arg(long, env = "MMBRIDGE_HOST_URL")]
    host_url: Option<String>,

    /// Reject calls the host has not answered within this many
    /// milliseconds.  0 waits forever.
    #[arg(long, env = "MMBRIDGE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Log every message crossing the bridge.
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call a client function and print its result.
    Call {
        /// Function name, e.g. `chatCompletion`.
        name: String,
        /// Params as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Subscribe to an event and print each occurrence.
    Listen {
        /// Event name, e.g. `onASRResult`.
        event: String,
        /// The host pushes this event unasked; skip `subscribeEvent`.
        #[arg(long)]
        private: bool,
        /// Exit after this many events.
        #[arg(long)]
        count: Option<usize>,
    },
}

impl Cli {
    /// Builds the configuration: file first, then CLI/env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    fn bridge_config(&self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(url) = &self.host_url {
            config.host_url = url.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.callback_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(config)
    }

    fn log_filter(&self) -> EnvFilter {
        if self.trace {
            return EnvFilter::new("info,multimodal_bridge=debug");
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_params(raw: &str) -> anyhow::Result<Value> {
    let params: Value =
        serde_json::from_str(raw).with_context(|| format!("--params is not valid JSON: {raw}"))?;
    anyhow::ensure!(params.is_object(), "--params must be a JSON object");
    Ok(params)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .init();

    let config = cli.bridge_config()?;
    let bridge = Arc::new(WebSocketBridge::connect(&config.host_url).await?);
    let center = EventCenter::new(Arc::clone(&bridge) as Arc<dyn Bridge>, config);
    bridge.notify_ready();
    let factory = ApiFactory::new(center);

    match cli.command {
        Command::Call { name, params } => {
            let params = parse_params(&params)?;
            let api: ClientApi<Value, Value> = factory.create_api(name.as_str(), ApiOptions::default());
            let result = api
                .call(params)
                .await
                .with_context(|| format!("call to {name} failed"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Listen {
            event,
            private,
            count,
        } => {
            let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
            let client_event: ClientEvent<Value> =
                factory.create_event(event.as_str(), EventOptions { is_private: private });
            let subscription = client_event.subscribe(move |params| {
                let _ = tx.send(params);
            });
            info!("listening for {event}");

            let mut seen = 0usize;
            loop {
                tokio::select! {
                    params = rx.recv() => {
                        let Some(params) = params else { break };
                        println!("{}", serde_json::to_string(&params)?);
                        seen += 1;
                        if count.is_some_and(|limit| seen >= limit) {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("received Ctrl+C");
                        break;
                    }
                    _ = closed(&bridge) => {
                        anyhow::bail!("host closed the connection");
                    }
                }
            }

            subscription.unsubscribe();
            // Let the unsubscribe frame go out before the runtime stops.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

/// Resolves once the WebSocket connection is gone.
async fn closed(bridge: &WebSocketBridge) {
    while bridge.is_open() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_params_default_to_empty_object() {
        let cli = Cli::parse_from(["mmbridge", "call", "closeApp"]);

        match cli.command {
            Command::Call { name, params } => {
                assert_eq!(name, "closeApp");
                assert_eq!(params, "{}");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_listen_flags() {
        let cli = Cli::parse_from(["mmbridge", "listen", "onASRResult", "--private", "--count", "3"]);

        match cli.command {
            Command::Listen {
                event,
                private,
                count,
            } => {
                assert_eq!(event, "onASRResult");
                assert!(private);
                assert_eq!(count, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_host_url_override() {
        // Arrange
        let cli = Cli::parse_from(["mmbridge", "--host-url", "ws://10.0.0.5:9000", "call", "x"]);

        // Act
        let config = cli.bridge_config().unwrap();

        // Assert
        assert_eq!(config.host_url, "ws://10.0.0.5:9000");
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let cli = Cli::parse_from(["mmbridge", "--timeout-ms", "0", "call", "x"]);
        let config = cli.bridge_config().unwrap();
        assert_eq!(config.callback_timeout, None);
    }

    #[test]
    fn test_timeout_override() {
        let cli = Cli::parse_from(["mmbridge", "--timeout-ms", "2500", "call", "x"]);
        let config = cli.bridge_config().unwrap();
        assert_eq!(config.callback_timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["mmbridge", "--config", "/nonexistent/mm.toml", "call", "x"]);
        assert!(cli.bridge_config().is_err());
    }

    #[test]
    fn test_parse_params_accepts_object() {
        assert_eq!(
            parse_params(r#"{"query":"hi"}"#).unwrap(),
            serde_json::json!({"query": "hi"})
        );
    }

    #[test]
    fn test_parse_params_rejects_non_object() {
        assert!(parse_params("[1,2]").is_err());
        assert!(parse_params("not json").is_err());
    }

    #[test]
    fn test_trace_flag_selects_debug_filter() {
        let cli = Cli::parse_from(["mmbridge", "--trace", "call", "x"]);
        assert!(cli.log_filter().to_string().contains("multimodal_bridge=debug"));
    }
}
