//! # Audio Stream Gateway
//!
//! HTTP + WebSocket front door for a real-time audio coaching client.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared application state and metrics
//! - **health**: Liveness and metrics endpoints
//! - **handlers**: Coaching REST endpoints
//! - **middleware**: Request logging, metrics and upgrade screening
//! - **websocket**: `/audio-stream` sessions, acknowledgments and the heartbeat registry
//! - **audio**: Extension point for whatever consumes the received audio
//! - **server**: Route table and gateway lifecycle
//! - **error**: Error types and HTTP error responses

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod server;
pub mod state;
pub mod websocket;

pub use config::AppConfig;
pub use server::Gateway;
pub use state::AppState;
