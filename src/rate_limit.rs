//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing, account spam and refresh token brute forcing.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::IpAddr, num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Requests per minute allowed per client IP on each limited endpoint.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub login_per_minute: u32,
    pub register_per_minute: u32,
    pub refresh_per_minute: u32,
    /// Key on the first `X-Forwarded-For` entry instead of the peer address
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_per_minute: 10,
            register_per_minute: 3,
            refresh_per_minute: 30,
            trust_forwarded_for: false,
        }
    }
}

/// Rate limiting state for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
    pub register: Arc<IpLimiter>,
    pub refresh: Arc<IpLimiter>,
    trust_forwarded_for: bool,
}

impl RateLimitConfig {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            login: Arc::new(keyed_per_minute(settings.login_per_minute)),
            register: Arc::new(keyed_per_minute(settings.register_per_minute)),
            refresh: Arc::new(keyed_per_minute(settings.refresh_per_minute)),
            trust_forwarded_for: settings.trust_forwarded_for,
        }
    }

    /// Check `limiter` for the request's client IP, then run the handler.
    async fn check(
        &self,
        limiter: &IpLimiter,
        request: Request,
        next: Next,
        message: &'static str,
    ) -> Response {
        let ip = match extract_client_ip(&request, self.trust_forwarded_for) {
            Ok(ip) => ip,
            Err(reason) => {
                warn!(reason, "Unable to determine client IP");
                return ApiError::forbidden("Unable to determine client IP.").into_response();
            }
        };

        match limiter.check_key(&ip) {
            Ok(_) => next.run(request).await,
            Err(_) => {
                warn!(%ip, path = %request.uri().path(), "Rate limit exceeded");
                ApiError::too_many_requests(message).into_response()
            }
        }
    }
}

/// Zero is clamped to one request per minute.
fn keyed_per_minute(per_minute: u32) -> IpLimiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    RateLimiter::keyed(Quota::per_minute(per_minute))
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    config
        .check(
            &config.login,
            request,
            next,
            "Too many login attempts. Please wait before trying again.",
        )
        .await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    config
        .check(
            &config.register,
            request,
            next,
            "Too many signup attempts. Please wait before trying again.",
        )
        .await
}

/// Middleware for rate limiting token refresh.
pub async fn rate_limit_refresh(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    config
        .check(
            &config.refresh,
            request,
            next,
            "Too many requests. Please try again later.",
        )
        .await
}
