use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared request budget for one upstream host. Clones share the same budget.
#[derive(Clone)]
pub struct RequestThrottle {
    limiter: Arc<DirectRateLimiter>,
}

impl RequestThrottle {
    pub fn new(quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(
                quota_window,
                quota_limit,
            ))),
        }
    }

    pub fn per_second(requests: u32) -> Self {
        Self::new(Duration::from_secs(1), requests)
    }

    /// Waits until a request slot is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Takes a slot if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .map(|quota| quota.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(burst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_burst_then_refuses() {
        let throttle = RequestThrottle::new(Duration::from_secs(60), 2);

        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[test]
    fn clones_share_the_budget() {
        let throttle = RequestThrottle::new(Duration::from_secs(60), 1);
        let clone = throttle.clone();

        assert!(throttle.try_acquire());
        assert!(!clone.try_acquire());
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let throttle = RequestThrottle::new(Duration::from_secs(60), 0);
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[tokio::test]
    async fn acquire_returns_when_budget_is_available() {
        let throttle = RequestThrottle::per_second(100);
        throttle.acquire().await;
        throttle.acquire().await;
    }
}
