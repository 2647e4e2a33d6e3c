//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

use propline_core::SeriesLayout;

/// Which dataset a run harvests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Addresses,
    Valuations,
}

impl DatasetKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Addresses => propline_address::DATASET,
            Self::Valuations => propline_valuation::DATASET,
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Global configuration for propline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub harvest: HarvestSection,
    pub http: HttpSection,
}

/// `[harvest]`: every key can also be given as a `propline run` flag
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestSection {
    pub dataset: Option<DatasetKind>,
    pub source_endpoint_template: Option<String>,
    pub output_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub privacy_policy_path: Option<PathBuf>,
    pub units_path: Option<PathBuf>,
    pub range: Option<String>,
    pub sample_limit: Option<usize>,
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub resume: bool,
    pub workers: usize,
    pub grid_cells_per_degree: u32,
    pub series_layout: SeriesLayout,
    pub zstd_level: i32,
    pub alarm_threshold: Option<f64>,
    pub api_key_env: Option<String>,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            dataset: None,
            source_endpoint_template: None,
            output_path: None,
            checkpoint_path: None,
            privacy_policy_path: None,
            units_path: None,
            range: None,
            sample_limit: None,
            rate_limit_per_second: 1.0,
            rate_limit_burst: 1,
            batch_size: 500,
            flush_interval_secs: 300,
            max_retry_attempts: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            request_timeout_secs: 30,
            resume: true,
            workers: 1,
            grid_cells_per_degree: 100,
            series_layout: SeriesLayout::Wide,
            zstd_level: 3,
            alarm_threshold: None,
            api_key_env: None,
        }
    }
}

/// `[http]`: request details not covered by `[harvest]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Header carrying the API key
    pub api_key_header: String,
    /// Literal key or `${VAR}`; `harvest.api_key_env` takes precedence
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            api_key_header: "X-API-Key".to_string(),
            api_key: None,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./propline.toml (current directory)
    /// 2. <user config dir>/propline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("propline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "propline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
