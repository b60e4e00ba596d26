//! Global token-bucket rate limit on calls to the Model Client (§4.8, §5).
//!
//! Grounded on `governor::{Quota, RateLimiter}` usage for wrapping an
//! outbound resource with `until_ready().await`, generalized from
//! per-domain crawl rate limiting to a single process-wide bucket shared by
//! every worker.

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use nonzero_ext::nonzero;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// `rate_limit_per_minute = 0` disables rate limiting entirely (§6).
pub enum ModelRateLimiter {
    Unlimited,
    Limited(Limiter),
}

impl ModelRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        if requests_per_minute == 0 {
            return ModelRateLimiter::Unlimited;
        }
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_minute(per_minute);
        ModelRateLimiter::Limited(RateLimiter::direct(quota))
    }

    pub async fn until_ready(&self) {
        if let ModelRateLimiter::Limited(limiter) = self {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_blocks() {
        let limiter = ModelRateLimiter::new(0);
        for _ in 0..1000 {
            limiter.until_ready().await;
        }
    }

    #[tokio::test]
    async fn limited_admits_burst_of_one_immediately() {
        let limiter = ModelRateLimiter::new(60);
        limiter.until_ready().await;
    }
}
