//! Explicit per-run configuration handed to [`Harvester`](crate::Harvester)

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HarvestError;
use crate::record::SeriesLayout;
use crate::retry::RetryPolicy;
use crate::spatial::GridResolution;

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub dataset: String,
    pub output_path: PathBuf,
    /// Defaults to `<output_path>.checkpoint.json`
    pub checkpoint_path: Option<PathBuf>,
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,
    /// Units per flush
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
    pub resume: bool,
    pub workers: usize,
    pub grid: GridResolution,
    pub series_layout: SeriesLayout,
    pub zstd_level: i32,
    /// Cumulative success rate below which a completed run is flagged
    pub alarm_threshold: Option<f64>,
    pub sample_limit: Option<usize>,
}

impl HarvestConfig {
    pub fn new(dataset: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset: dataset.into(),
            output_path: output_path.into(),
            checkpoint_path: None,
            rate_limit_per_second: 1.0,
            rate_limit_burst: 1,
            batch_size: 500,
            flush_interval: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            resume: true,
            workers: 1,
            grid: GridResolution::DEFAULT,
            series_layout: SeriesLayout::Wide,
            zstd_level: 3,
            alarm_threshold: None,
            sample_limit: None,
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| default_checkpoint_path(&self.output_path))
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        let fail = |msg: String| Err(HarvestError::Config(msg));
        if self.output_path.as_os_str().is_empty() {
            return fail("output_path is required".into());
        }
        if !(self.rate_limit_per_second.is_finite() && self.rate_limit_per_second > 0.0) {
            return fail(format!(
                "rate_limit_per_second must be positive, got {}",
                self.rate_limit_per_second
            ));
        }
        if self.rate_limit_burst == 0 {
            return fail("rate_limit_burst must be at least 1".into());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if self.workers == 0 {
            return fail("workers must be at least 1".into());
        }
        if !(1..=22).contains(&self.zstd_level) {
            return fail(format!("zstd_level must be 1-22, got {}", self.zstd_level));
        }
        if let Some(t) = self.alarm_threshold {
            if !(0.0..=1.0).contains(&t) {
                return fail(format!("alarm_threshold must be within [0, 1], got {t}"));
            }
        }
        if self.retry.max_delay < self.retry.base_delay {
            return fail("retry_max_delay_ms must be >= retry_base_delay_ms".into());
        }
        if self.grid.cells_per_degree() == 0 {
            log::warn!("grid_cells_per_degree = 0: no rows will be spatially indexed");
        }
        Ok(())
    }
}

pub fn default_checkpoint_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".checkpoint.json");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HarvestConfig {
        HarvestConfig::new("addresses", "/data/addresses.parquet")
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config().validate().is_ok());
        assert_eq!(config().batch_size, 500);
        assert_eq!(config().flush_interval, Duration::from_secs(300));
        assert_eq!(config().alarm_threshold, None);
    }

    #[test]
    fn checkpoint_path_defaults_next_to_output() {
        assert_eq!(
            config().checkpoint_path(),
            PathBuf::from("/data/addresses.parquet.checkpoint.json")
        );
        let custom = HarvestConfig {
            checkpoint_path: Some("/state/cp.json".into()),
            ..config()
        };
        assert_eq!(custom.checkpoint_path(), PathBuf::from("/state/cp.json"));
    }

    #[test]
    fn rejects_bad_values() {
        let cases = [
            HarvestConfig {
                rate_limit_per_second: 0.0,
                ..config()
            },
            HarvestConfig {
                batch_size: 0,
                ..config()
            },
            HarvestConfig {
                workers: 0,
                ..config()
            },
            HarvestConfig {
                zstd_level: 23,
                ..config()
            },
            HarvestConfig {
                alarm_threshold: Some(1.5),
                ..config()
            },
        ];
        for case in cases {
            assert!(matches!(case.validate(), Err(HarvestError::Config(_))));
        }
    }
}
