use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

const DEFAULT_DIALS_PER_INTERVAL: usize = 5;
const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Throttle on outbound websocket dials.
///
/// Every dial across a manager's fleet acquires one slot before connecting.
/// Substitute an implementation via [`crate::Config::burst_limiter`] to share
/// a budget with other traffic or to disable throttling in tests.
#[async_trait]
pub trait BurstLimiter: Send + Sync + fmt::Debug {
    /// Wait until one outbound dial may proceed.
    async fn acquire(&self);
}

#[derive(Debug)]
struct Bucket {
    tokens: usize,
    last_refill: Instant,
}

/// Token bucket allowing `capacity` dials per `interval`.
///
/// The bucket refills to full once per interval. A semaphore additionally
/// bounds how many callers may be inside [`BurstLimiter::acquire`] at once.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: usize,
    interval: Duration,
    concurrency: Semaphore,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Construct a new [`TokenBucket`] allowing `capacity` dials every
    /// `interval`, with at most `max_concurrent` callers waiting inside
    /// `acquire` at a time.
    #[must_use]
    pub fn new(capacity: usize, interval: Duration, max_concurrent: usize) -> Self {
        Self {
            capacity,
            interval,
            concurrency: Semaphore::new(max_concurrent),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(
            DEFAULT_DIALS_PER_INTERVAL,
            DEFAULT_REFILL_INTERVAL,
            DEFAULT_MAX_CONCURRENT,
        )
    }
}

#[async_trait]
impl BurstLimiter for TokenBucket {
    async fn acquire(&self) {
        // The semaphore is never closed, so acquisition can only fail if the
        // limiter itself is torn down mid-await.
        let Ok(_permit) = self.concurrency.acquire().await else {
            return;
        };

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                if now.duration_since(bucket.last_refill) >= self.interval {
                    bucket.tokens = self.capacity;
                    bucket.last_refill = now;
                }

                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }

                self.interval
                    .saturating_sub(now.duration_since(bucket.last_refill))
            };

            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_capacity_is_immediate() {
        let limiter = TokenBucket::new(3, Duration::from_millis(100), 3);

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(
            start.elapsed() < Duration::from_millis(50),
            "in-budget dials must not wait"
        );
    }

    #[tokio::test]
    async fn exhausted_bucket_waits_for_refill() {
        let limiter = TokenBucket::new(2, Duration::from_millis(50), 2);
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(
            start.elapsed() >= Duration::from_millis(40),
            "fourth dial should wait for the next refill"
        );
    }

    #[tokio::test]
    async fn refill_restores_full_budget() {
        let limiter = TokenBucket::new(2, Duration::from_millis(30), 2);
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(
            start.elapsed() < Duration::from_millis(20),
            "a full interval should restore the whole budget"
        );
    }
}
