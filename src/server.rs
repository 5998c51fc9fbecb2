//! # Gateway Server
//!
//! Builds the actix-web `HttpServer`, wires routes and middleware, and owns
//! the lifecycle of the connection registry: the registry (and with it the
//! heartbeat) lives exactly as long as the gateway.
//!
//! ## Middleware order (outermost first):
//! 1. `RequestLogging`
//! 2. `MetricsMiddleware`
//! 3. CORS (permissive)
//! 4. `UpgradeGate` (path + origin screening for upgrades, on the raw path)
//! 5. `NormalizePath` (trailing slashes trimmed for routing)

use actix_cors::Cors;
use actix_web::{dev::ServerHandle, middleware::NormalizePath, web, App, HttpServer};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AUDIO_STREAM_PATH;
use crate::middleware::{MetricsMiddleware, RequestLogging, UpgradeGate};
use crate::state::AppState;
use crate::websocket::registry::Shutdown;
use crate::{handlers, health, websocket};

/// Route table, shared by the server and handler tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health::root))
        .service(
            web::scope("/api")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/coaching/clear-buffer", web::post().to(handlers::clear_buffer)),
        )
        .route(AUDIO_STREAM_PATH, web::get().to(websocket::audio_stream));
}

/// A running gateway.
pub struct Gateway {
    state: AppState,
    local_addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

impl Gateway {
    /// Bind to the configured host and port and start serving.
    pub fn bind(state: AppState) -> Result<Self> {
        let bind_addr = state.config().bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        Self::start(state, listener)
    }

    /// Start serving on an already bound listener (port 0 works for tests).
    ///
    /// Must be called from inside the actix system that owns `state`.
    pub fn start(state: AppState, listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let config = state.config().clone();
        let app_state = state.clone();

        let mut server = HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .wrap(NormalizePath::trim())
                .wrap(UpgradeGate::new(AUDIO_STREAM_PATH, app_state.origin_policy()))
                .wrap(cors)
                .wrap(MetricsMiddleware)
                .wrap(RequestLogging)
                .configure(routes)
        })
        .disable_signals()
        .shutdown_timeout(config.shutdown_timeout().as_secs());

        if config.server.workers > 0 {
            server = server.workers(config.server.workers);
        }

        let server = server
            .listen(listener)
            .with_context(|| format!("failed to listen on {}", local_addr))?
            .run();
        let handle = server.handle();
        let task = actix_web::rt::spawn(server);

        info!("HTTP+WS listening on {}", local_addr);

        Ok(Self {
            state,
            local_addr,
            handle,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Close every WebSocket, cancel the heartbeat and stop the HTTP server.
    pub async fn stop(self) {
        teardown(&self.state, &self.handle).await;
        if let Err(err) = self.task.await {
            error!("Server task error: {}", err);
        }
    }

    /// Serve until the server exits on its own or `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Gateway {
            state,
            handle,
            mut task,
            ..
        } = self;

        tokio::select! {
            result = &mut task => {
                match result {
                    Ok(Ok(())) => info!("Server exited"),
                    Ok(Err(e)) => error!("Server error: {}", e),
                    Err(e) => error!("Server task error: {}", e),
                }
                // The listener is gone; drop the heartbeat with it.
                if let Err(err) = state.registry.send(Shutdown).await {
                    warn!("Connection registry already stopped: {}", err);
                }
            }
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
                teardown(&state, &handle).await;
                if let Err(err) = task.await {
                    error!("Server task error: {}", err);
                }
            }
        }

        info!("Server stopped gracefully");
        Ok(())
    }
}

async fn teardown(state: &AppState, handle: &ServerHandle) {
    match state.registry.send(Shutdown).await {
        Ok(closed) => info!(closed, "Closed open WebSocket connections"),
        Err(err) => warn!("Connection registry already stopped: {}", err),
    }
    handle.stop(true).await;
}
