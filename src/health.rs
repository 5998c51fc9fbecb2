use crate::state::AppState;
use crate::websocket::registry::ConnectionCount;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

/// `GET /`: plain liveness answer for uptime monitors.
pub async fn root() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("OK")
}

/// `GET /api/health`
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "ok": true,
        "ts": chrono::Utc::now().timestamp_millis()
    }))
}

/// `GET /api/metrics`
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.config();

    let registered_connections = match state.registry.send(ConnectionCount).await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(error = %err, "Connection registry unavailable");
            None
        }
    };

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "websocket": {
            "active_connections": metrics.active_connections,
            "registered_connections": registered_connections,
            "total_connections": metrics.total_connections,
            "heartbeat_terminations": metrics.heartbeat_terminations,
            "messages_acknowledged": metrics.messages_acknowledged,
            "bytes_acknowledged": metrics.bytes_acknowledged,
            "heartbeat_interval_secs": config.websocket.heartbeat_interval_secs
        },
        "endpoints": endpoint_stats
    }))
}
