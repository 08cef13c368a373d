//! Shared rate limiter for upstream API calls
//!
//! Enforces a minimum delay between requests so that every adapter sharing
//! one upstream stays under that upstream's published rate limit.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Rate limiter that spaces requests at least `min_interval` apart
///
/// Each caller reserves its time slot while holding the lock and only then
/// sleeps, so concurrent callers get distinct slots.
#[derive(Debug)]
pub struct RateLimiter {
    /// Next free slot, in milliseconds since `epoch`
    next_available_ms: Mutex<u64>,
    epoch: Instant,
    min_interval: Duration,
    name: String,
    total_requests: AtomicU64,
    waited_requests: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with the given minimum interval between requests
    pub fn new(min_interval_ms: u64, name: &str) -> Self {
        Self {
            next_available_ms: Mutex::new(0),
            epoch: Instant::now(),
            min_interval: Duration::from_millis(min_interval_ms),
            name: name.to_string(),
            total_requests: AtomicU64::new(0),
            waited_requests: AtomicU64::new(0),
        }
    }

    /// Create a limiter from a requests-per-minute budget
    pub fn per_minute(requests_per_minute: u32, name: &str) -> Self {
        let interval_ms = 60_000 / u64::from(requests_per_minute.max(1));
        Self::new(interval_ms, name)
    }

    fn elapsed_ms(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_millis() as u64
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        let request_num = self.total_requests.fetch_add(1, Ordering::Relaxed) + 1;
        let now_ms = self.elapsed_ms();
        let interval_ms = self.min_interval.as_millis() as u64;

        let wait_until = {
            let mut next_available = self.next_available_ms.lock().await;

            if now_ms >= *next_available {
                *next_available = now_ms + interval_ms;
                None
            } else {
                let our_slot = *next_available;
                *next_available = our_slot + interval_ms;
                self.waited_requests.fetch_add(1, Ordering::Relaxed);
                Some(self.epoch + Duration::from_millis(our_slot))
            }
        };

        if let Some(target) = wait_until {
            let wait = target.saturating_duration_since(Instant::now());
            debug!(
                "[RATE_LIMITER:{}] #{} waiting {:?}",
                self.name, request_num, wait
            );
            tokio::time::sleep_until(target).await;
        }
    }

    /// Whether a request could be sent right now without waiting
    pub async fn can_acquire_immediately(&self) -> bool {
        let now_ms = self.elapsed_ms();
        let next_available = self.next_available_ms.lock().await;
        now_ms >= *next_available
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            waited_requests: self.waited_requests.load(Ordering::Relaxed),
            min_interval_ms: self.min_interval.as_millis() as u64,
            ready: self.can_acquire_immediately().await,
            name: self.name.clone(),
        }
    }
}

/// Statistics about rate limiter usage
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub waited_requests: u64,
    pub min_interval_ms: u64,
    /// A request sent now would not wait
    pub ready: bool,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_immediate() {
        let limiter = RateLimiter::new(100, "test");

        let start = Instant::now();
        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_waits() {
        let limiter = RateLimiter::new(100, "test");
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_acquire_immediately() {
        let limiter = RateLimiter::new(100, "test");
        assert!(limiter.can_acquire_immediately().await);

        limiter.acquire().await;
        assert!(!limiter.can_acquire_immediately().await);

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(limiter.can_acquire_immediately().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_get_distinct_slots() {
        let limiter = Arc::new(RateLimiter::new(50, "concurrent_test"));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                start.elapsed()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.waited_requests, 4);
        assert!(!stats.ready);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.stats().await.ready);
    }

    #[test]
    fn test_per_minute_interval() {
        let limiter = RateLimiter::per_minute(300, "llama");
        assert_eq!(limiter.min_interval(), Duration::from_millis(200));
    }
}
