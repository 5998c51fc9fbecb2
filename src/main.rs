//! # Audio Stream Gateway - Main Application Entry Point
//!
//! Loads configuration, sets up tracing, starts the gateway and waits for
//! SIGINT/SIGTERM before closing every WebSocket and stopping the server.

use anyhow::Result;
use audio_stream_gateway::{AppConfig, AppState, Gateway};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-stream-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        heartbeat_interval_secs = config.websocket.heartbeat_interval_secs,
        max_message_bytes = config.websocket.max_message_bytes,
        allowed_origins = config.websocket.allowed_origins.len(),
        "WebSocket settings"
    );

    let state = AppState::new(config);
    let gateway = Gateway::bind(state)?;

    gateway.run_until(shutdown_signal()).await
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` overrides the default filter of
/// `audio_stream_gateway=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_stream_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = wait_for_ctrl_c() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT (Ctrl+C)"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            // Never resolve rather than shutting down immediately
            std::future::pending::<()>().await;
        }
    }
}
