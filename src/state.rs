//! # Application State Management
//!
//! State shared by every HTTP handler and every WebSocket actor.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: many workers and socket actors hold a reference
//! - **RwLock**: metrics are read by `/api/metrics` and written by every request
//!
//! The connection registry is not behind a lock at all: it is an actor, and
//! `AppState` only carries its address.

use actix::{Actor, Addr};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::audio::{AudioSink, DiscardSink};
use crate::config::AppConfig;
use crate::websocket::origin::{policy_from_config, OriginPolicy};
use crate::websocket::registry::ConnectionRegistry;

/// The main application state.
///
/// Cloning is cheap: every field is either `Copy` or reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Configuration the gateway was started with (read-only afterwards)
    pub config: Arc<AppConfig>,

    /// Request and connection counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the gateway started
    pub start_time: Instant,

    /// Open `/audio-stream` connections and the heartbeat that polices them
    pub registry: Addr<ConnectionRegistry>,

    origin_policy: Arc<dyn OriginPolicy>,
    audio_sink: Arc<dyn AudioSink>,
}

/// Counters collected across all requests and connections.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since start
    pub request_count: u64,

    /// Requests answered with a 4xx/5xx status or a service error
    pub error_count: u64,

    /// WebSocket connections currently open
    pub active_connections: u64,

    /// WebSocket connections accepted since start
    pub total_connections: u64,

    /// Connections dropped because they missed a heartbeat
    pub heartbeat_terminations: u64,

    /// Inbound messages that received an acknowledgment
    pub messages_acknowledged: u64,

    /// Sum of the byte counts reported in acknowledgments
    pub bytes_acknowledged: u64,

    /// Key: "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create the state and start the connection registry.
    ///
    /// ## Runtime requirement:
    /// The registry is an actix actor, so this must be called from inside a
    /// running actix system (`#[actix_web::main]` or `#[actix_web::test]`).
    ///
    /// The origin policy comes from `websocket.allowed_origins` and the audio
    /// sink discards payloads; both can be replaced with the `with_*` methods.
    pub fn new(config: AppConfig) -> Self {
        let registry = ConnectionRegistry::new(config.heartbeat_interval()).start();
        let origin_policy = policy_from_config(&config.websocket);

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            registry,
            origin_policy,
            audio_sink: Arc::new(DiscardSink),
        }
    }

    pub fn with_origin_policy(mut self, policy: impl OriginPolicy) -> Self {
        self.origin_policy = Arc::new(policy);
        self
    }

    pub fn with_audio_sink(mut self, sink: impl AudioSink) -> Self {
        self.audio_sink = Arc::new(sink);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn origin_policy(&self) -> Arc<dyn OriginPolicy> {
        Arc::clone(&self.origin_policy)
    }

    pub fn audio_sink(&self) -> Arc<dyn AudioSink> {
        Arc::clone(&self.audio_sink)
    }

    /// A panic while holding the lock leaves plain counters behind, which
    /// are still usable, so poisoning is ignored.
    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record one request against its endpoint ("GET /api/health", ...).
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn connection_opened(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_connections += 1;
        metrics.total_connections += 1;
    }

    pub fn connection_closed(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    pub fn record_heartbeat_termination(&self) {
        self.metrics_mut().heartbeat_terminations += 1;
    }

    pub fn record_acknowledgment(&self, bytes: usize) {
        let mut metrics = self.metrics_mut();
        metrics.messages_acknowledged += 1;
        metrics.bytes_acknowledged += bytes as u64;
    }

    /// Copy of the current metrics, so the lock isn't held while a response
    /// is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::ConnectionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[actix_web::test]
    async fn test_connection_counters() {
        let state = AppState::new(AppConfig::default());
        state.connection_opened();
        state.connection_opened();
        state.connection_closed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_connections, 1);
        assert_eq!(metrics.total_connections, 2);

        // Closing more than was opened never underflows.
        state.connection_closed();
        state.connection_closed();
        assert_eq!(state.get_metrics_snapshot().active_connections, 0);
    }

    #[actix_web::test]
    async fn test_acknowledgment_and_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_acknowledgment(5);
        state.record_acknowledgment(1024);
        state.record_endpoint_request("GET /", 4, false);
        state.record_endpoint_request("GET /", 6, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.messages_acknowledged, 2);
        assert_eq!(metrics.bytes_acknowledged, 1029);

        let root = &metrics.endpoint_metrics["GET /"];
        assert_eq!(root.request_count, 2);
        assert_eq!(root.average_duration_ms(), 5.0);
        assert_eq!(root.error_rate(), 0.5);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }

    struct CountingSink(Arc<AtomicUsize>);

    impl AudioSink for CountingSink {
        fn accept(&self, _connection: ConnectionId, payload: &[u8]) {
            self.0.fetch_add(payload.len(), Ordering::SeqCst);
        }
    }

    #[actix_web::test]
    async fn test_extension_points_can_be_replaced() {
        let received = Arc::new(AtomicUsize::new(0));
        let state = AppState::new(AppConfig::default())
            .with_origin_policy(|origin: Option<&str>| origin.is_none())
            .with_audio_sink(CountingSink(received.clone()));

        assert!(state.origin_policy().allows(None));
        assert!(!state.origin_policy().allows(Some("https://app.example")));

        state.audio_sink().accept(ConnectionId::new(), b"abc");
        assert_eq!(received.load(Ordering::SeqCst), 3);
    }
}
