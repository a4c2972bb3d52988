//! Token-bucket limiter for outbound model requests.
//!
//! Requests over budget wait rather than fail. The bucket sits behind an async
//! mutex that is held across the wait, so callers are served in arrival order.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, period: Duration, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / period.as_secs_f64().max(f64::EPSILON),
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Take one token at `now`, or return how long to wait for the next one.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - self.tokens) / self.refill_per_sec,
            ))
        }
    }
}

/// Limits requests to `requests` per `period`, with a burst of `requests`.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests: u32, period: Duration) -> Self {
        Self {
            bucket: Mutex::new(Bucket::new(requests, period, Instant::now())),
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        loop {
            match bucket.try_take(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
