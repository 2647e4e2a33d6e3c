//! Token-bucket request gate shared by every fetch in a run.
//!
//! The bucket starts empty and refills at `rate` tokens per second up to
//! `burst`. A caller that finds no token reserves the next one (the balance goes
//! negative) and sleeps outside the lock, so concurrent callers queue fairly.
//! `n` calls therefore take at least `n / rate` seconds, and any window of
//! length `W` admits at most `rate * W + burst` calls.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// Gate at `rate_per_second` with up to `burst` back-to-back calls after idling.
    ///
    /// A non-finite or non-positive rate disables gating.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let rate = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            rate_per_second
        } else {
            f64::INFINITY
        };
        Self {
            rate,
            burst: f64::from(burst.max(1)),
            state: Mutex::new(Bucket {
                tokens: 0.0,
                last: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY, 1)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Block until a request may be sent. Returns how long the caller waited.
    pub fn acquire(&self) -> Duration {
        if self.rate.is_infinite() {
            return Duration::ZERO;
        }
        let wait = {
            let mut bucket = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let refill = now.saturating_duration_since(bucket.last).as_secs_f64() * self.rate;
            bucket.tokens = (bucket.tokens + refill).min(self.burst);
            bucket.last = now;
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.tokens / self.rate)
            }
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..1000 {
            assert_eq!(limiter.acquire(), Duration::ZERO);
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn zero_rate_means_unlimited() {
        assert!(RateLimiter::new(0.0, 1).rate().is_infinite());
        assert!(RateLimiter::new(f64::NAN, 1).rate().is_infinite());
    }

    #[test]
    fn n_calls_take_at_least_n_over_rate() {
        let limiter = RateLimiter::new(50.0, 1);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire();
        }
        // Bucket starts empty: 10 calls at 50/s need >= 200ms
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn burst_refills_after_idle() {
        let limiter = RateLimiter::new(100.0, 3);
        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(15));
    }

    #[test]
    fn shared_across_threads() {
        let limiter = Arc::new(RateLimiter::new(40.0, 1));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..3 {
                        limiter.acquire();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 12 calls at 40/s => >= 300ms regardless of thread count
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
