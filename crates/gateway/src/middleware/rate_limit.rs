//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use datachat_common::errors::{AppError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide limiter shared by every request
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<DefaultDirectRateLimiter>,
    limit: u32,
}

impl RateLimitState {
    pub fn new(requests_per_second: u32, burst: u32) -> Result<Self> {
        let non_zero = |value: u32, name: &str| {
            NonZeroU32::new(value).ok_or_else(|| AppError::Configuration {
                message: format!("rate_limit.{} must be greater than zero", name),
            })
        };

        let quota = Quota::per_second(non_zero(requests_per_second, "requests_per_second")?)
            .allow_burst(non_zero(burst, "burst")?);

        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            limit: requests_per_second,
        })
    }

    fn check(&self) -> Result<()> {
        self.limiter
            .check()
            .map_err(|_| AppError::RateLimited { limit: self.limit })
    }
}

/// Rate limiting middleware
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Err(e) = state.check() {
        tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
        return Err(e);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let state = RateLimitState::new(100, 200).unwrap();
        assert!(state.check().is_ok());
    }

    #[test]
    fn test_zero_quota_is_configuration_error() {
        assert!(matches!(
            RateLimitState::new(0, 10),
            Err(AppError::Configuration { .. })
        ));
        assert!(matches!(
            RateLimitState::new(10, 0),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_burst_exhaustion() {
        let state = RateLimitState::new(1, 2).unwrap();
        assert!(state.check().is_ok());
        assert!(state.check().is_ok());
        assert!(matches!(
            state.check(),
            Err(AppError::RateLimited { limit: 1 })
        ));
    }
}
