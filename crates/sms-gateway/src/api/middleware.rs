//! Rate limiting and other middleware.

use crate::error::GatewayError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

/// Global rate limiter (not keyed by tenant).
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    pub global: Arc<GlobalLimiter>,
}

impl RateLimitState {
    /// Allow `requests_per_minute`; zero falls back to 600.
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN.saturating_add(599));

        Self {
            global: Arc::new(RateLimiter::direct(Quota::per_minute(rpm))),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        Self::new(100_000)
    }
}

/// Returns 429 once the global limit is exhausted.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if rate_limit.global.check().is_err() {
        warn!("Global rate limit exceeded");
        return Err(GatewayError::RateLimited);
    }

    Ok(next.run(request).await)
}

/// Logging middleware for requests.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        warn!(%method, %uri, %status, ?duration, "Request failed");
    } else {
        debug!(%method, %uri, %status, ?duration, "Request completed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_exhaustion() {
        let state = RateLimitState::new(1);

        assert!(state.global.check().is_ok());
        assert!(state.global.check().is_err());
    }

    #[test]
    fn test_zero_uses_fallback() {
        let state = RateLimitState::new(0);
        for _ in 0..600 {
            assert!(state.global.check().is_ok());
        }
        assert!(state.global.check().is_err());
    }
}
