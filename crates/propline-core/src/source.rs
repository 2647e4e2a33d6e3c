//! Harvestable units and the source-client seam.
//!
//! Provider wire protocols live behind [`SourceClient`]. [`RateLimitedSource`]
//! wraps any client with the run's shared [`RateLimiter`] and [`RetryPolicy`].

use std::ops::Range;
use std::path::Path;

use crate::error::FetchError;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// One harvestable unit: its position in the ordered unit list and its key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitRef {
    pub index: u64,
    pub key: String,
}

impl UnitRef {
    pub fn new(index: u64, key: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
        }
    }
}

/// Unprocessed source response for one unit. Never persisted or logged as-is.
pub struct RawPayload {
    pub unit: UnitRef,
    pub body: String,
}

impl std::fmt::Debug for RawPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPayload")
            .field("unit", &self.unit.key)
            .field("bytes", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl RawPayload {
    pub fn new(unit: UnitRef, body: impl Into<String>) -> Self {
        Self {
            unit,
            body: body.into(),
        }
    }

    /// Loggable reference to the payload: key, size and a short digest of the body
    pub fn reference(&self) -> String {
        let digest = blake3::hash(self.body.as_bytes());
        format!(
            "{} ({} bytes, blake3:{})",
            self.unit.key,
            self.body.len(),
            &digest.to_hex()[..12]
        )
    }
}

/// Fetches one logical unit from an external source
pub trait SourceClient: Send + Sync {
    fn fetch(&self, unit: &UnitRef) -> Result<RawPayload, FetchError>;
}

impl<C: SourceClient + ?Sized> SourceClient for Box<C> {
    fn fetch(&self, unit: &UnitRef) -> Result<RawPayload, FetchError> {
        (**self).fetch(unit)
    }
}

/// Source client behind a shared request gate and retry policy.
///
/// Every attempt (retries included) takes a token from the limiter.
pub struct RateLimitedSource<C> {
    client: C,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl<C: SourceClient> RateLimitedSource<C> {
    pub fn new(client: C, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            retry,
        }
    }

    pub fn fetch(&self, unit: &UnitRef) -> Result<RawPayload, FetchError> {
        if unit.key.trim().is_empty() {
            return Err(FetchError::malformed("empty unit key"));
        }
        retry_with_backoff(&self.retry, &unit.key, |_| {
            self.limiter.acquire();
            self.client.fetch(unit)
        })
    }
}

/// Load units from a file, one key per line. Blank lines and `#` comments are skipped.
pub fn units_from_file(path: &Path) -> std::io::Result<Vec<UnitRef>> {
    let content = std::fs::read_to_string(path)?;
    let units: Vec<UnitRef> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .enumerate()
        .map(|(idx, key)| UnitRef::new(idx as u64, key))
        .collect();
    log::debug!("{}: {} units", path.display(), units.len());
    Ok(units)
}

/// Units for a numeric cursor range; the key is the number itself
pub fn units_from_range(range: Range<u64>) -> Vec<UnitRef> {
    let start = range.start;
    range
        .map(|n| UnitRef::new(n - start, n.to_string()))
        .collect()
}

/// Parse `"START..END"` (end exclusive)
pub fn parse_range(s: &str) -> Option<Range<u64>> {
    let (start, end) = s.split_once("..")?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (start <= end).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Flaky {
        failures_left: Mutex<u32>,
        status: u16,
    }

    impl SourceClient for Flaky {
        fn fetch(&self, unit: &UnitRef) -> Result<RawPayload, FetchError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::from_status(self.status, "scripted"));
            }
            Ok(RawPayload::new(unit.clone(), "{}"))
        }
    }

    fn source(failures: u32, status: u16, retries: u32) -> RateLimitedSource<Flaky> {
        RateLimitedSource::new(
            Flaky {
                failures_left: Mutex::new(failures),
                status,
            },
            RateLimiter::unlimited(),
            RetryPolicy::immediate(retries),
        )
    }

    #[test]
    fn transient_recovered_by_retry() {
        let src = source(2, 503, 3);
        assert!(src.fetch(&UnitRef::new(0, "a")).is_ok());
    }

    #[test]
    fn transient_beyond_cap_is_exhausted() {
        let src = source(10, 500, 2);
        let err = src.fetch(&UnitRef::new(0, "a")).unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn not_found_is_permanent() {
        let src = source(1, 404, 3);
        let err = src.fetch(&UnitRef::new(0, "a")).unwrap_err();
        assert!(matches!(err, FetchError::Permanent { status: Some(404), .. }));
    }

    #[test]
    fn empty_key_rejected_without_fetch() {
        let src = source(0, 200, 0);
        let err = src.fetch(&UnitRef::new(0, "  ")).unwrap_err();
        assert!(matches!(err, FetchError::Permanent { status: None, .. }));
    }

    #[test]
    fn payload_reference_hides_body() {
        let raw = RawPayload::new(UnitRef::new(3, "GANSW123"), r#"{"owner_name":"Jane"}"#);
        let reference = raw.reference();
        assert!(reference.starts_with("GANSW123 ("));
        assert!(!reference.contains("Jane"));
        assert!(!format!("{raw:?}").contains("Jane"));
    }

    #[test]
    fn units_from_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.txt");
        std::fs::write(&path, "# header\nA1\n\n  B2 \nC3\n").unwrap();
        let units = units_from_file(&path).unwrap();
        let keys: Vec<_> = units.iter().map(|u| u.key.as_str()).collect();
        assert_eq!(keys, ["A1", "B2", "C3"]);
        assert_eq!(units[2].index, 2);
    }

    #[test]
    fn range_units_are_zero_indexed() {
        let units = units_from_range(100..103);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], UnitRef::new(0, "100"));
        assert_eq!(units[2], UnitRef::new(2, "102"));
    }

    #[test]
    fn parse_range_forms() {
        assert_eq!(parse_range("1..5"), Some(1..5));
        assert_eq!(parse_range(" 0 .. 10 "), Some(0..10));
        assert_eq!(parse_range("5..1"), None);
        assert_eq!(parse_range("abc"), None);
    }
}
