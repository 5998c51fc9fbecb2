//! Screens every connection-upgrade request before routing.
//!
//! An upgrade is let through only when its path, with trailing slashes
//! stripped, is the stream path and the origin policy accepts its `Origin`
//! header. Anything else gets an empty response and the connection is closed,
//! so no handshake ever happens.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{self, HeaderValue},
        StatusCode,
    },
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::{
    borrow::Cow,
    future::{ready, Ready},
    sync::Arc,
};
use tracing::info;

use crate::websocket::OriginPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeRejection {
    /// Normalized path is not the stream path.
    Path(String),
    /// The origin policy refused the `Origin` header.
    Origin(Option<String>),
}

impl UpgradeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            UpgradeRejection::Path(_) => StatusCode::NOT_FOUND,
            UpgradeRejection::Origin(_) => StatusCode::FORBIDDEN,
        }
    }
}

/// Strips trailing slashes; a path made only of slashes becomes `/`.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Decides whether an upgrade request for `path` with the raw `Origin`
/// header may proceed.
///
/// Header bytes that are not visible ASCII are decoded lossily and still go
/// to the policy; a present `Origin` is never treated as absent.
pub fn screen_upgrade(
    path: &str,
    origin: Option<&HeaderValue>,
    expected_path: &str,
    policy: &dyn OriginPolicy,
) -> Result<(), UpgradeRejection> {
    let normalized = normalize_path(path);
    if normalized != expected_path {
        return Err(UpgradeRejection::Path(normalized.to_string()));
    }

    let origin = origin.map(|value| String::from_utf8_lossy(value.as_bytes()));
    if !policy.allows(origin.as_deref()) {
        return Err(UpgradeRejection::Origin(origin.map(Cow::into_owned)));
    }

    Ok(())
}

pub struct UpgradeGate {
    path: &'static str,
    policy: Arc<dyn OriginPolicy>,
}

impl UpgradeGate {
    pub fn new(path: &'static str, policy: Arc<dyn OriginPolicy>) -> Self {
        Self { path, policy }
    }
}

impl<S, B> Transform<S, ServiceRequest> for UpgradeGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = UpgradeGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(UpgradeGateMiddleware {
            service,
            path: self.path,
            policy: Arc::clone(&self.policy),
        }))
    }
}

pub struct UpgradeGateMiddleware<S> {
    service: S,
    path: &'static str,
    policy: Arc<dyn OriginPolicy>,
}

impl<S, B> Service<ServiceRequest> for UpgradeGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if req.headers().contains_key(header::UPGRADE) {
            let origin = req.headers().get(header::ORIGIN);

            if let Err(rejection) = screen_upgrade(req.path(), origin, self.path, self.policy.as_ref()) {
                let remote_addr = req
                    .connection_info()
                    .realip_remote_addr()
                    .unwrap_or("unknown")
                    .to_string();
                info!(
                    remote_addr = %remote_addr,
                    uri = %req.uri(),
                    rejection = ?rejection,
                    "Upgrade rejected, closing connection"
                );

                let (request, _payload) = req.into_parts();
                let response = HttpResponse::build(rejection.status())
                    .force_close()
                    .finish()
                    .map_into_right_body();
                return Box::pin(ready(Ok(ServiceResponse::new(request, response))));
            }
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let response = fut.await?;
            Ok(response.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AUDIO_STREAM_PATH;
    use crate::websocket::{AllowAnyOrigin, OriginAllowList};

    fn origin(value: &'static str) -> HeaderValue {
        HeaderValue::from_static(value)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/audio-stream"), "/audio-stream");
        assert_eq!(normalize_path("/audio-stream/"), "/audio-stream");
        assert_eq!(normalize_path("/audio-stream///"), "/audio-stream");
        assert_eq!(normalize_path("//audio-stream"), "//audio-stream");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_screen_upgrade_path() {
        let policy = AllowAnyOrigin;
        assert!(screen_upgrade("/audio-stream", None, AUDIO_STREAM_PATH, &policy).is_ok());
        assert!(screen_upgrade("/audio-stream/", None, AUDIO_STREAM_PATH, &policy).is_ok());
        assert_eq!(
            screen_upgrade("/wrong-path", None, AUDIO_STREAM_PATH, &policy),
            Err(UpgradeRejection::Path("/wrong-path".to_string()))
        );
        assert_eq!(
            screen_upgrade("/audio-stream/extra", None, AUDIO_STREAM_PATH, &policy),
            Err(UpgradeRejection::Path("/audio-stream/extra".to_string()))
        );
        assert_eq!(
            screen_upgrade("//audio-stream", None, AUDIO_STREAM_PATH, &policy),
            Err(UpgradeRejection::Path("//audio-stream".to_string()))
        );
        assert_eq!(
            screen_upgrade("/", None, AUDIO_STREAM_PATH, &policy),
            Err(UpgradeRejection::Path("/".to_string()))
        );
    }

    #[test]
    fn test_screen_upgrade_origin() {
        let permissive = AllowAnyOrigin;
        let anywhere = origin("https://anywhere.example");
        assert!(screen_upgrade("/audio-stream", Some(&anywhere), AUDIO_STREAM_PATH, &permissive).is_ok());

        let strict = OriginAllowList::new(["https://app.example"]);
        let app = origin("https://app.example");
        assert!(screen_upgrade("/audio-stream", Some(&app), AUDIO_STREAM_PATH, &strict).is_ok());

        let evil = origin("https://evil.example");
        let rejection = screen_upgrade("/audio-stream", Some(&evil), AUDIO_STREAM_PATH, &strict)
            .unwrap_err();
        assert_eq!(rejection, UpgradeRejection::Origin(Some("https://evil.example".to_string())));
        assert_eq!(rejection.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_unreadable_origin_is_not_treated_as_absent() {
        let garbled = HeaderValue::from_bytes(b"https://\xe9vil.example").unwrap();
        assert!(garbled.to_str().is_err());

        let strict = OriginAllowList::new(["https://app.example"]);
        let rejection = screen_upgrade("/audio-stream", Some(&garbled), AUDIO_STREAM_PATH, &strict)
            .unwrap_err();
        assert_eq!(
            rejection,
            UpgradeRejection::Origin(Some("https://\u{fffd}vil.example".to_string()))
        );
        assert_eq!(rejection.status(), StatusCode::FORBIDDEN);

        // The permissive default still lets it through.
        assert!(screen_upgrade("/audio-stream", Some(&garbled), AUDIO_STREAM_PATH, &AllowAnyOrigin).is_ok());

        let seen_absent = |origin: Option<&str>| origin.is_none();
        assert!(screen_upgrade("/audio-stream", Some(&garbled), AUDIO_STREAM_PATH, &seen_absent).is_err());
    }

    #[test]
    fn test_path_checked_before_origin() {
        let strict = OriginAllowList::new(["https://app.example"]);
        let evil = origin("https://evil.example");
        let rejection = screen_upgrade("/nope", Some(&evil), AUDIO_STREAM_PATH, &strict)
            .unwrap_err();
        assert_eq!(rejection.status(), StatusCode::NOT_FOUND);
    }
}
