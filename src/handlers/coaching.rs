use crate::state::AppState;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use tracing::debug;

/// `POST /api/coaching/clear-buffer`
///
/// Always 204. The body is never read, so empty, JSON and non-JSON payloads
/// are all accepted. Any server-side audio state lives in the audio sink,
/// which is asked to drop it.
pub async fn clear_buffer(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("0");
    debug!(content_length, "Clear-buffer requested");

    state.audio_sink().reset();

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use crate::audio::AudioSink;
    use crate::config::AppConfig;
    use crate::server::routes;
    use crate::state::AppState;
    use crate::websocket::ConnectionId;
    use actix_web::{body::to_bytes, http::header, http::StatusCode, test, web, App};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ResetCounter(Arc<AtomicUsize>);

    impl AudioSink for ResetCounter {
        fn accept(&self, _connection: ConnectionId, _payload: &[u8]) {}

        fn reset(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[actix_web::test]
    async fn test_clear_buffer_accepts_any_payload() {
        let resets = Arc::new(AtomicUsize::new(0));
        let state = AppState::new(AppConfig::default()).with_audio_sink(ResetCounter(resets.clone()));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(routes),
        )
        .await;

        let requests = vec![
            test::TestRequest::post().uri("/api/coaching/clear-buffer").to_request(),
            test::TestRequest::post()
                .uri("/api/coaching/clear-buffer")
                .insert_header((header::CONTENT_TYPE, "application/json"))
                .set_payload(r#"{"sessionId":"abc"}"#)
                .to_request(),
            test::TestRequest::post()
                .uri("/api/coaching/clear-buffer")
                .insert_header((header::CONTENT_TYPE, "application/json"))
                .set_payload("{not json")
                .to_request(),
            test::TestRequest::post()
                .uri("/api/coaching/clear-buffer")
                .insert_header((header::CONTENT_TYPE, "application/octet-stream"))
                .set_payload(vec![0u8; 4096])
                .to_request(),
        ];

        for req in requests {
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
            let body = to_bytes(resp.into_body()).await.unwrap();
            assert!(body.is_empty());
        }

        assert_eq!(resets.load(Ordering::SeqCst), 4);
    }

    #[actix_web::test]
    async fn test_clear_buffer_is_post_only() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/coaching/clear-buffer").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }
}
