//! Error taxonomy for harvest runs
//!
//! Per-unit errors ([`FetchError`], [`NormalizeError`]) are isolated and end up
//! as [`SkipReason`] counts in the run summary. Only [`PersistenceError`]
//! (wrapped in [`HarvestError`]) aborts a run.

use std::path::PathBuf;

/// Failure fetching one unit from the source.
#[derive(Debug)]
pub enum FetchError {
    /// Retryable: timeout, connection failure, 5xx, 429
    Transient {
        status: Option<u16>,
        message: String,
    },
    /// Not retryable: unit absent, malformed, or rejected by the source
    Permanent {
        status: Option<u16>,
        message: String,
    },
    /// Transient failures exceeded the retry cap
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient {
                status: Some(s),
                message,
            }
            | Self::Permanent {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Transient {
                status: None,
                message,
            } => write!(f, "transient error: {message}"),
            Self::Permanent {
                status: None,
                message,
            } => write!(f, "permanent error: {message}"),
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Classify a non-success HTTP status.
    ///
    /// 408, 429 and 5xx are transient; every other status is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if matches!(status, 408 | 429 | 500..=599) {
            Self::Transient {
                status: Some(status),
                message,
            }
        } else {
            Self::Permanent {
                status: Some(status),
                message,
            }
        }
    }

    /// Malformed unit (empty key, unusable endpoint); never retried
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status of the (last) failed attempt, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
            Self::Exhausted { last, .. } => last.status(),
        }
    }

    /// Summary bucket for this failure
    pub fn skip_reason(&self) -> SkipReason {
        match self {
            Self::Permanent { status, .. } => SkipReason::Permanent(*status),
            Self::Transient { status, .. } => SkipReason::RetriesExhausted(*status),
            Self::Exhausted { .. } => SkipReason::RetriesExhausted(self.status()),
        }
    }
}

/// Payload could not be mapped onto the canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Body empty or JSON `null` (the source has nothing for this unit)
    Empty,
    InvalidJson(String),
    NotAnObject,
    MissingField(&'static str),
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty payload"),
            Self::InvalidJson(e) => write!(f, "invalid JSON: {e}"),
            Self::NotAnObject => f.write_str("payload is not a JSON object"),
            Self::MissingField(name) => write!(f, "missing required field '{name}'"),
            Self::InvalidValue { field, message } => write!(f, "invalid '{field}': {message}"),
        }
    }
}

impl std::error::Error for NormalizeError {}

impl NormalizeError {
    /// Stable label used to aggregate skips
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty payload",
            Self::InvalidJson(_) => "invalid json",
            Self::NotAnObject => "not an object",
            Self::MissingField(_) => "missing field",
            Self::InvalidValue { .. } => "invalid value",
        }
    }
}

/// Checkpoint or output write failure. Fatal for the run.
#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parquet {
        path: PathBuf,
        message: String,
    },
    Checkpoint {
        path: PathBuf,
        message: String,
    },
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "IO on {}: {source}", path.display()),
            Self::Parquet { path, message } => {
                write!(f, "parquet output {}: {message}", path.display())
            }
            Self::Checkpoint { path, message } => {
                write!(f, "checkpoint {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parquet(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Parquet {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Run-level error: anything that stops a harvest before it completes
#[derive(Debug)]
pub enum HarvestError {
    Persistence(PersistenceError),
    /// Another orchestrator holds the dataset lock
    Locked {
        path: PathBuf,
        holder: Option<String>,
    },
    Config(String),
}

impl std::fmt::Display for HarvestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(e) => write!(f, "persistence failure: {e}"),
            Self::Locked {
                path,
                holder: Some(pid),
            } => write!(
                f,
                "dataset locked by running pid {pid} ({})",
                path.display()
            ),
            Self::Locked { path, holder: None } => write!(
                f,
                "dataset locked ({}); no pid recorded, remove the file if no run is active",
                path.display()
            ),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for HarvestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PersistenceError> for HarvestError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

/// Why a unit produced no output. Aggregated in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    Permanent(Option<u16>),
    RetriesExhausted(Option<u16>),
    Normalize(&'static str),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent(Some(404)) => f.write_str("not found (HTTP 404)"),
            Self::Permanent(Some(s)) => write!(f, "rejected (HTTP {s})"),
            Self::Permanent(None) => f.write_str("malformed unit"),
            Self::RetriesExhausted(Some(s)) => write!(f, "retries exhausted (HTTP {s})"),
            Self::RetriesExhausted(None) => f.write_str("retries exhausted (network)"),
            Self::Normalize(kind) => write!(f, "normalization: {kind}"),
        }
    }
}
