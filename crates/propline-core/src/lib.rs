//! Propline Core - resumable harvesting of property datasets into Parquet
//!
//! Fetches units from a rate-limited source, normalizes and privacy-filters
//! each record, tags it with a spatial grid cell, and compacts the result
//! into a single typed Parquet file with a checkpoint beside it.

pub mod checkpoint;
pub mod compact;
pub mod config;
pub mod error;
pub mod harvest;
pub mod http;
pub mod lock;
pub mod logging;
pub mod normalize;
pub mod privacy;
pub mod progress;
pub mod rate_limit;
pub mod record;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod spatial;
pub mod stats;
pub mod work_queue;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use compact::{CompactStats, Compactor, output_stats, read_rows};
pub use config::HarvestConfig;
pub use error::{FetchError, HarvestError, NormalizeError, PersistenceError, SkipReason};
pub use harvest::Harvester;
pub use http::{HttpSourceClient, SHARED_RUNTIME};
pub use lock::{DatasetLock, LockHolder};
pub use logging::{IndicatifLogger, init_logging};
pub use normalize::{DatasetSchema, FieldKind, FieldSpec, Normalizer, SeriesSpec, flatten};
pub use privacy::{FilteredRecord, PrivacyPolicy};
pub use progress::{ProgressContext, ProgressSnapshot, SharedProgress};
pub use rate_limit::RateLimiter;
pub use record::{CanonicalRecord, OutputBatch, OutputRow, Series, SeriesLayout, Value};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use shutdown::Shutdown;
pub use sink::{ParquetSink, cleanup_tmp_files, write_atomic};
pub use source::{
    RateLimitedSource, RawPayload, SourceClient, UnitRef, parse_range, units_from_file,
    units_from_range,
};
pub use spatial::{GridResolution, SpatialKey, grid_key};
pub use stats::{RunStatus, RunSummary};
