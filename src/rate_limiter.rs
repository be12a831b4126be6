//! Token-bucket rate limiting for high-volume per-session event streams
//! (network: 50/s, console: 10/s by default).

use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    dropped: std::sync::atomic::AtomicU64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32) -> Self {
        let rate = f64::from(rate_per_sec);
        RateLimiter {
            bucket: Mutex::new(Bucket {
                tokens: rate,
                capacity: rate,
                refill_per_sec: rate,
                last_refill: Instant::now(),
            }),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Try to take one token. Returns `false` (and counts a drop) if the
    /// bucket is empty.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * bucket.refill_per_sec).min(bucket.capacity);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            drop(bucket);
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            false
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity_then_drops() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.dropped_count(), 1);
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1000);
        for _ in 0..1000 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(limiter.try_acquire(), "bucket should have partially refilled");
    }
}
