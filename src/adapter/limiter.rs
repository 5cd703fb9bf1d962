// src/adapter/limiter.rs
// Token-bucket gate on outbound sends

use std::time::Instant;
use tokio::sync::Mutex;
use tracing::trace;

/// Token bucket: capacity = rate, continuous refill, monotonic clock.
///
/// `acquire` returns immediately while a whole token is available; otherwise
/// it sleeps exactly the time until the next token matures and retries.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rate: f64,
    capacity: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `rate_per_sec` is both the refill rate and the bucket capacity.
    pub fn new(rate_per_sec: u32) -> Self {
        let rate = f64::from(rate_per_sec.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            rate,
            capacity: rate,
        }
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        loop {
            let wait_ms = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                ((1.0 - state.tokens) / self.rate * 1000.0).ceil() as u64
            };
            trace!(wait_ms, "Rate limiter saturated, waiting for refill");
            tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
        }
    }

    /// Current token count after refill; diagnostics only.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_empty_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // Bucket is empty; the 6th acquire must wait at least ~1000/5 ms
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_sequence_pacing_lower_bound() {
        // N sends at rate R: elapsed >= (N - R) / R seconds once the bucket
        // empties. With N=8, R=4: >= 1 second.
        let limiter = RateLimiter::new(4);
        let start = Instant::now();
        for _ in 0..8 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(950));
    }

    #[tokio::test]
    async fn test_refill_caps_at_capacity() {
        let limiter = RateLimiter::new(2);
        limiter.acquire().await;
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        // Long idle must not accumulate beyond capacity
        let available = limiter.available().await;
        assert!(available <= 2.0 + f64::EPSILON);
        assert!(available >= 1.9);
    }
}
