//! # Configuration Management
//!
//! Loads the gateway configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` in the working directory
//! - Environment variables with the `APP_` prefix
//! - The bare `HOST` and `PORT` variables set by hosting platforms
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT`
//! 2. `APP_SERVER__PORT`, `APP_WEBSOCKET__HEARTBEAT_INTERVAL_SECS`, ...
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Sections are separated by a double underscore in variable names because
//! several keys contain single underscores themselves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Path the WebSocket upgrade is served on, after trailing slashes are stripped.
pub const AUDIO_STREAM_PATH: &str = "/audio-stream";

/// Main application configuration.
///
/// ## Why separate config structs:
/// The HTTP listener and the WebSocket session loop are tuned independently,
/// so each gets its own section in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
}

/// Listener settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: accept connections on every interface (default, what
///   container platforms expect)
/// - `host = "127.0.0.1"`: local development only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of actix workers; 0 means one per available CPU.
    pub workers: usize,
    /// How long in-flight connections get to finish after a stop request.
    pub shutdown_timeout_secs: u64,
}

/// Settings for `/audio-stream` sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Seconds between liveness sweeps. A peer that misses one full interval
    /// without answering a ping is terminated on the following sweep.
    pub heartbeat_interval_secs: u64,
    /// Largest message accepted, whether a single frame or a reassembled
    /// fragmented message.
    pub max_message_bytes: usize,
    /// Origins accepted on upgrade. Empty accepts every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: 0,
                shutdown_timeout_secs: 10,
            },
            websocket: WebSocketConfig {
                heartbeat_interval_secs: 25,
                max_message_bytes: 100 * 1024 * 1024,
                allowed_origins: Vec::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `PORT=3000`: override the listening port
    /// - `HOST=127.0.0.1`: override the bind address
    /// - `APP_WEBSOCKET__HEARTBEAT_INTERVAL_SECS=10`: faster liveness sweeps
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("websocket.allowed_origins")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The heartbeat interval is at least one second
    /// - The message size limit allows at least one byte
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.websocket.max_message_bytes == 0 {
            return Err(anyhow::anyhow!("Max message size must be greater than 0"));
        }

        Ok(())
    }

    /// Address string handed to the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.websocket.heartbeat_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}
