//! Origin checks for WebSocket upgrades.
//!
//! Browsers always send an `Origin` header on upgrade; native clients usually
//! don't. The gateway hands the raw header value (if any) to an
//! [`OriginPolicy`] before the handshake is attempted. The default policy
//! accepts everything, so restricting origins later is a matter of swapping
//! the policy, not of touching the transport.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::WebSocketConfig;

/// Accept/reject decision over the `Origin` header of an upgrade request.
pub trait OriginPolicy: Send + Sync + 'static {
    fn allows(&self, origin: Option<&str>) -> bool;
}

/// Any closure `Fn(Option<&str>) -> bool` can be used as a policy.
impl<F> OriginPolicy for F
where
    F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
{
    fn allows(&self, origin: Option<&str>) -> bool {
        self(origin)
    }
}

/// Accepts every origin, including requests without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginPolicy for AllowAnyOrigin {
    fn allows(&self, _origin: Option<&str>) -> bool {
        true
    }
}

/// Accepts only origins from a fixed list. Requests without an `Origin`
/// header are non-browser clients and are let through.
#[derive(Debug, Clone)]
pub struct OriginAllowList {
    origins: HashSet<String>,
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|origin| normalize_origin(&origin.into()))
                .collect(),
        }
    }
}

impl OriginPolicy for OriginAllowList {
    fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => self.origins.contains(&normalize_origin(origin)),
            None => true,
        }
    }
}

/// Origins compare case-insensitively and without a trailing slash.
fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Builds the policy described by the configuration: permissive when no
/// origins are listed.
pub fn policy_from_config(config: &WebSocketConfig) -> Arc<dyn OriginPolicy> {
    if config.allowed_origins.is_empty() {
        Arc::new(AllowAnyOrigin)
    } else {
        Arc::new(OriginAllowList::new(config.allowed_origins.iter().cloned()))
    }
}
