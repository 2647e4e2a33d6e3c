//! Retry with exponential backoff and jitter
//!
//! One [`RetryPolicy`] is shared by every fetch in a run, so all call sites get
//! identical retry semantics.

use std::time::Duration;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the backoff that may be shaved off at random, in `[0, 1]`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts (tests, replay)
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Exponential backoff before retry `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied. `salt` decorrelates units retrying at the same time.
    pub fn delay(&self, attempt: u32, salt: &str) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        self.backoff(attempt)
            .mul_f64(1.0 - jitter * jitter_fraction(salt, attempt))
    }
}

/// Deterministic value in `[0, 1)` derived from (salt, attempt)
fn jitter_fraction(salt: &str, attempt: u32) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(&attempt.to_le_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

/// Run `attempt_fn` until it succeeds, fails permanently, or the policy gives up.
///
/// `attempt_fn` receives the 1-based attempt number. Exhausting retries on a
/// transient error yields [`FetchError::Exhausted`].
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt_fn: impl FnMut(u32) -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 1u32;
    loop {
        match attempt_fn(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.delay(attempt, label);
                log::debug!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries + 1
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: 0.5,
        }
    }

    #[test]
    fn backoff_exponential() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_capped() {
        let p = policy();
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(64), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_band() {
        let p = policy();
        for attempt in 1..=4 {
            let full = p.backoff(attempt);
            let d = p.delay(attempt, "unit-17");
            assert!(d <= full);
            assert!(d >= full.mul_f64(0.5));
        }
    }

    #[test]
    fn jitter_deterministic_per_salt() {
        let p = policy();
        assert_eq!(p.delay(2, "a"), p.delay(2, "a"));
        assert_ne!(p.delay(2, "a"), p.delay(2, "b"));
    }

    #[test]
    fn zero_jitter_is_plain_backoff() {
        let p = RetryPolicy {
            jitter: 0.0,
            ..policy()
        };
        assert_eq!(p.delay(3, "x"), p.backoff(3));
    }

    #[test]
    fn retries_transient_then_succeeds() {
        let mut calls = 0;
        let result = retry_with_backoff(&RetryPolicy::immediate(3), "u", |_| {
            calls += 1;
            if calls < 3 {
                Err(FetchError::from_status(503, "unavailable"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn permanent_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::immediate(3), "u", |_| {
            calls += 1;
            Err(FetchError::from_status(404, "not found"))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(FetchError::Permanent { .. })));
    }

    #[test]
    fn exhausted_after_cap() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::immediate(2), "u", |_| {
            calls += 1;
            Err(FetchError::from_status(429, "too many requests"))
        });
        assert_eq!(calls, 3);
        match result {
            Err(FetchError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }
}
