//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, QuantaClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use moodmap_common::errors::AppError;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Create a new rate limiter; zero settings are raised to one
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<GlobalRateLimiter> {
    let rate = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);

    Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<GlobalRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(QuantaClock::default().now());
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            AppError::RateLimited {
                wait_secs: wait.as_secs_f64(),
            }
            .into_response()
        }
    }
}
