//! Minimum-spacing rate limiter shared by every catalog worker.
//!
//! Backed by a direct `governor` limiter with a burst of one: a slot is
//! granted at most once per `request_delay_ms`, whatever the number of
//! concurrent workers, and an idle period earns no credit for back-to-back
//! requests. Callers [`acquire`](RateLimiter::acquire) a slot before each
//! request. A zero delay disables limiting.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RateLimiter {
    limiter: Option<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        let limiter = Quota::with_period(min_delay)
            .map(|quota| governor::RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self { limiter }
    }

    /// Wait for the next request slot and claim it.
    ///
    /// Returns the instant the slot was granted.
    pub async fn acquire(&self) -> Instant {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // Clock skew allowance between governor's clock and tokio's.
    const SLACK: Duration = Duration::from_millis(3);

    #[tokio::test]
    async fn spaces_sequential_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        let c = limiter.acquire().await;
        assert!(b - a + SLACK >= Duration::from_millis(40));
        assert!(c - b + SLACK >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_delay_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn concurrent_workers_never_burst() {
        let delay = Duration::from_millis(20);
        let limiter = Arc::new(RateLimiter::new(delay));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut grants = Vec::new();
                for _ in 0..3 {
                    grants.push(limiter.acquire().await);
                }
                grants
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        assert_eq!(all.len(), 12);
        for pair in all.windows(2) {
            assert!(pair[1] - pair[0] + SLACK >= delay);
        }
        assert!(all[11] - start + SLACK >= delay * 11);
    }

    #[tokio::test]
    async fn idle_period_earns_no_burst() {
        let delay = Duration::from_millis(30);
        let limiter = RateLimiter::new(delay);
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let first = limiter.acquire().await;
        let second = limiter.acquire().await;
        assert!(second - first + SLACK >= delay);
    }
}
