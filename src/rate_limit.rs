//! Token bucket used to space out writes against the Notion API.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// One permit per `interval`, bursting up to `capacity` (at least 1).
    pub fn new(interval: Duration, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            interval,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Fixed spacing without bursts.
    pub fn every(interval: Duration) -> Self {
        Self::new(interval, 1)
    }

    /// Wait until a permit is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_take() {
                None => return,
                Some(wait) => wait,
            };
            sleep(wait).await;
        }
    }

    /// Take a permit now, or report how long until one is available.
    fn try_take(&self) -> Option<Duration> {
        if self.interval.is_zero() {
            return None;
        }
        let mut bucket = match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        bucket.tokens = (bucket.tokens + refill).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            Some(self.interval.mul_f64(missing))
        }
    }
}
