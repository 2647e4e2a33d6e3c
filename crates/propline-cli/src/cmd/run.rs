//! `propline run` - harvest one dataset to a Parquet file

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;

use propline_address::AddressNormalizer;
use propline_core::{
    GridResolution, HarvestConfig, Harvester, HttpSourceClient, Normalizer, PrivacyPolicy,
    RetryPolicy, RunStatus, RunSummary, SeriesLayout, SharedProgress, Shutdown, UnitRef,
    parse_range, units_from_file, units_from_range,
};
use propline_valuation::ValuationNormalizer;

use crate::config::{Config, DatasetKind};

/// Flags override `[harvest]` keys of the same name
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Dataset to harvest
    #[arg(short, long, value_enum)]
    pub dataset: Option<DatasetKind>,

    /// Source URL with a `{unit}` placeholder
    #[arg(long)]
    pub source_endpoint_template: Option<String>,

    /// Output Parquet file
    #[arg(short, long)]
    pub output_path: Option<PathBuf>,

    /// Checkpoint file (default: <output>.checkpoint.json)
    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,

    /// Privacy allow-list (TOML `allow = [...]`); dataset default if unset
    #[arg(long)]
    pub privacy_policy_path: Option<PathBuf>,

    /// Unit list, one key per line
    #[arg(short, long, conflicts_with = "range")]
    pub units_path: Option<PathBuf>,

    /// Numeric unit range "START..END" (end exclusive)
    #[arg(long)]
    pub range: Option<String>,

    /// Stop after this many units (test runs)
    #[arg(short = 'l', long)]
    pub sample_limit: Option<usize>,

    #[arg(long)]
    pub rate_limit_per_second: Option<f64>,

    #[arg(long)]
    pub rate_limit_burst: Option<u32>,

    /// Units per flush
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub flush_interval_secs: Option<u64>,

    #[arg(long)]
    pub max_retry_attempts: Option<u32>,

    #[arg(long)]
    pub retry_base_delay_ms: Option<u64>,

    #[arg(long)]
    pub retry_max_delay_ms: Option<u64>,

    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Continue from the checkpoint (`--resume false` starts fresh)
    #[arg(long, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub resume: Option<bool>,

    /// Concurrent fetches
    #[arg(short, long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub grid_cells_per_degree: Option<u32>,

    /// wide | long
    #[arg(long)]
    pub series_layout: Option<SeriesLayout>,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,

    /// Exit 1 when the success rate ends below this fraction
    #[arg(long)]
    pub alarm_threshold: Option<f64>,

    /// Environment variable holding the API key
    #[arg(long)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum UnitSource {
    File(PathBuf),
    Range(std::ops::Range<u64>),
}

/// Flags merged over the config file
#[derive(Debug)]
struct RunPlan {
    dataset: DatasetKind,
    endpoint: String,
    request_timeout: Duration,
    api_key: Option<(String, String)>,
    privacy_policy_path: Option<PathBuf>,
    units: UnitSource,
    harvest: HarvestConfig,
}

impl RunPlan {
    fn resolve(args: RunArgs, config: &Config) -> Result<Self> {
        let file = &config.harvest;

        let Some(dataset) = args.dataset.or(file.dataset) else {
            bail!("dataset is required (--dataset or [harvest].dataset)");
        };
        let Some(endpoint) = args
            .source_endpoint_template
            .or_else(|| file.source_endpoint_template.clone())
        else {
            bail!("source_endpoint_template is required");
        };
        let Some(output_path) = args.output_path.or_else(|| file.output_path.clone()) else {
            bail!("output_path is required (--output-path or [harvest].output_path)");
        };

        // A flag for either unit source replaces both file keys
        let (units_path, range) = if args.units_path.is_some() || args.range.is_some() {
            (args.units_path, args.range)
        } else {
            (file.units_path.clone(), file.range.clone())
        };
        let units = match (units_path, range) {
            (Some(path), None) => UnitSource::File(path),
            (None, Some(range)) => UnitSource::Range(
                parse_range(&range)
                    .with_context(|| format!("invalid range '{range}' (expected START..END)"))?,
            ),
            (Some(_), Some(_)) => bail!("units_path and range are mutually exclusive"),
            (None, None) => bail!("one of units_path or range is required"),
        };

        let api_key_env = args.api_key_env.or_else(|| file.api_key_env.clone());
        let api_key = match api_key_env {
            Some(var) => Some(std::env::var(&var).with_context(|| {
                format!("api_key_env: environment variable {var} is not set")
            })?),
            None => config.http.api_key.clone(),
        }
        .map(|key| (config.http.api_key_header.clone(), key));

        let mut harvest = HarvestConfig::new(dataset.name(), output_path);
        harvest.checkpoint_path = args.checkpoint_path.or_else(|| file.checkpoint_path.clone());
        harvest.rate_limit_per_second = args
            .rate_limit_per_second
            .unwrap_or(file.rate_limit_per_second);
        harvest.rate_limit_burst = args.rate_limit_burst.unwrap_or(file.rate_limit_burst);
        harvest.batch_size = args.batch_size.unwrap_or(file.batch_size);
        harvest.flush_interval = Duration::from_secs(
            args.flush_interval_secs.unwrap_or(file.flush_interval_secs),
        );
        harvest.retry = RetryPolicy {
            max_retries: args.max_retry_attempts.unwrap_or(file.max_retry_attempts),
            base_delay: Duration::from_millis(
                args.retry_base_delay_ms.unwrap_or(file.retry_base_delay_ms),
            ),
            max_delay: Duration::from_millis(
                args.retry_max_delay_ms.unwrap_or(file.retry_max_delay_ms),
            ),
            ..RetryPolicy::default()
        };
        harvest.resume = args.resume.unwrap_or(file.resume);
        harvest.workers = args.workers.unwrap_or(file.workers);
        harvest.grid = GridResolution::new(
            args.grid_cells_per_degree
                .unwrap_or(file.grid_cells_per_degree),
        );
        harvest.series_layout = args.series_layout.unwrap_or(file.series_layout);
        harvest.zstd_level = args.zstd_level.unwrap_or(file.zstd_level);
        harvest.alarm_threshold = args.alarm_threshold.or(file.alarm_threshold);
        harvest.sample_limit = args.sample_limit.or(file.sample_limit);

        Ok(Self {
            dataset,
            endpoint,
            request_timeout: Duration::from_secs(
                args.request_timeout_secs.unwrap_or(file.request_timeout_secs),
            ),
            api_key,
            privacy_policy_path: args
                .privacy_policy_path
                .or_else(|| file.privacy_policy_path.clone()),
            units,
            harvest,
        })
    }

    fn load_units(&self) -> Result<Vec<UnitRef>> {
        match &self.units {
            UnitSource::File(path) => units_from_file(path)
                .with_context(|| format!("failed to read units from {}", path.display())),
            UnitSource::Range(range) => Ok(units_from_range(range.clone())),
        }
    }
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let plan = RunPlan::resolve(args, config)?;
    let units = plan.load_units()?;

    let mut client = HttpSourceClient::new(&plan.endpoint, plan.request_timeout)?;
    if let Some((header, key)) = plan.api_key.clone() {
        client = client.with_api_key(&header, key);
    }

    let shutdown = Shutdown::new();
    shutdown
        .install_signal_handlers()
        .context("failed to install signal handlers")?;

    log::info!("Harvesting {}", plan.dataset);
    log::info!("  Source: {}", plan.endpoint);
    log::info!("  Output: {}", plan.harvest.output_path.display());
    log::info!(
        "  Rate: {}/s (burst {}), {} worker(s)",
        plan.harvest.rate_limit_per_second,
        plan.harvest.rate_limit_burst,
        plan.harvest.workers
    );

    match plan.dataset {
        DatasetKind::Addresses => {
            harvest(plan, client, AddressNormalizer, &units, shutdown, progress)
        }
        DatasetKind::Valuations => {
            harvest(plan, client, ValuationNormalizer, &units, shutdown, progress)
        }
    }
}

fn harvest<N: Normalizer>(
    plan: RunPlan,
    client: HttpSourceClient,
    normalizer: N,
    units: &[UnitRef],
    shutdown: Shutdown,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let policy = match &plan.privacy_policy_path {
        Some(path) => PrivacyPolicy::load(path)?,
        None => normalizer.default_policy(),
    };
    log::debug!("Allowed fields: {}", policy.entries().join(", "));

    let alarm = plan.harvest.alarm_threshold;
    let harvester = Harvester::new(plan.harvest, client, normalizer, policy)?
        .with_shutdown(shutdown)
        .with_progress(progress.clone());
    let summary = harvester.run(units)?;

    if progress.is_tty() {
        summary.print();
    } else {
        summary.log();
    }
    Ok(exit_code(&summary, alarm))
}

fn exit_code(summary: &RunSummary, alarm: Option<f64>) -> ExitCode {
    if summary.status == RunStatus::Interrupted {
        return ExitCode::from(130);
    }
    if summary.below_alarm(alarm) {
        log::warn!(
            "Success rate {:.1}% is below the alarm threshold {:.1}%",
            summary.success_rate().unwrap_or(0.0) * 100.0,
            alarm.unwrap_or(0.0) * 100.0
        );
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        let mut argv = vec!["propline"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).run
    }

    fn file_config() -> Config {
        toml::from_str(
            r#"
[harvest]
dataset = "addresses"
source_endpoint_template = "https://geo.example.com/address/{unit}"
output_path = "/data/addresses.parquet"
units_path = "/data/addresses.txt"
rate_limit_per_second = 2.0
batch_size = 250
"#,
        )
        .unwrap()
    }

    #[test]
    fn file_values_used_without_flags() {
        let plan = RunPlan::resolve(RunArgs::default(), &file_config()).unwrap();
        assert_eq!(plan.dataset, DatasetKind::Addresses);
        assert_eq!(plan.units, UnitSource::File("/data/addresses.txt".into()));
        assert_eq!(plan.harvest.rate_limit_per_second, 2.0);
        assert_eq!(plan.harvest.batch_size, 250);
        assert!(plan.harvest.resume);
        assert_eq!(plan.request_timeout, Duration::from_secs(30));
        assert_eq!(plan.api_key, None);
    }

    #[test]
    fn flags_override_file() {
        let args = parse(&[
            "--dataset",
            "valuations",
            "--range",
            "100..200",
            "--batch-size",
            "10",
            "--resume",
            "false",
            "--series-layout",
            "long",
            "--max-retry-attempts",
            "2",
        ]);
        let plan = RunPlan::resolve(args, &file_config()).unwrap();
        assert_eq!(plan.dataset, DatasetKind::Valuations);
        assert_eq!(plan.harvest.dataset, "valuations");
        // Flag range replaces the file's units_path
        assert_eq!(plan.units, UnitSource::Range(100..200));
        assert_eq!(plan.harvest.batch_size, 10);
        assert!(!plan.harvest.resume);
        assert_eq!(plan.harvest.series_layout, SeriesLayout::Long);
        assert_eq!(plan.harvest.retry.max_retries, 2);
        assert_eq!(plan.harvest.rate_limit_per_second, 2.0);
    }

    #[test]
    fn missing_required_values() {
        let err = RunPlan::resolve(RunArgs::default(), &Config::default()).unwrap_err();
        assert!(err.to_string().contains("dataset"));

        let mut config = file_config();
        config.harvest.units_path = None;
        let err = RunPlan::resolve(RunArgs::default(), &config).unwrap_err();
        assert!(err.to_string().contains("units_path or range"));
    }

    #[test]
    fn bad_range_rejected() {
        let args = parse(&["--range", "200..100"]);
        assert!(RunPlan::resolve(args, &file_config()).is_err());
    }

    #[test]
    fn unset_api_key_env_is_an_error() {
        let args = parse(&["--api-key-env", "PROPLINE_TEST_UNSET_KEY_98765"]);
        let err = RunPlan::resolve(args, &file_config()).unwrap_err();
        assert!(err.to_string().contains("PROPLINE_TEST_UNSET_KEY_98765"));
    }

    #[test]
    fn units_from_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.txt");
        std::fs::write(&path, "# header\nGANSW1\n\nGANSW2\n").unwrap();
        let args = parse(&["--units-path", path.to_str().unwrap()]);
        let plan = RunPlan::resolve(args, &file_config()).unwrap();
        let units = plan.load_units().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1], UnitRef::new(1, "GANSW2"));
    }

    #[test]
    fn exit_codes() {
        let mut summary = RunSummary::new("addresses", 10, 0);
        summary.total_attempted = 10;
        summary.total_succeeded = 5;
        assert_eq!(exit_code(&summary, None), ExitCode::SUCCESS);
        assert_eq!(exit_code(&summary, Some(0.4)), ExitCode::SUCCESS);
        assert_eq!(exit_code(&summary, Some(0.6)), ExitCode::from(1));

        summary.status = RunStatus::Interrupted;
        assert_eq!(exit_code(&summary, Some(0.6)), ExitCode::from(130));
    }
}
