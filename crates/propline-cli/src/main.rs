//! propline - resumable harvesting of property datasets
//!
//! Harvests addresses or valuations one unit at a time from a rate-limited
//! source into a spatially indexed, zstd-compressed Parquet file.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "propline")]
#[command(about = "Resumable, rate-limited property dataset harvester")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./propline.toml or the user config dir)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest a dataset (resumes from the checkpoint by default)
    Run(cmd::run::RunArgs),
    /// Show checkpoint and output state
    Status(cmd::status::StatusArgs),
    /// Re-compact an existing output file in place
    Compact(cmd::compact::CompactArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(propline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; the progress bar shows activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    if let Err(e) = propline_core::init_logging(quiet, cli.debug, multi) {
        eprintln!("failed to init logger: {e}");
    }

    match dispatch(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            // Checkpoint (if any) stays valid for a resume
            ExitCode::from(2)
        }
    }
}

fn dispatch(cli: Cli, progress: &propline_core::SharedProgress) -> Result<ExitCode> {
    let config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, progress),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Compact(args) => {
            cmd::compact::run(args, &config, progress).map(|()| ExitCode::SUCCESS)
        }
        Command::Config => {
            eprintln!("\n{}", config_table(&config));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn config_table(config: &Config) -> comfy_table::Table {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let h = &config.harvest;
    let opt = |v: Option<String>| v.unwrap_or_else(|| "not set".to_string());
    let path = |p: &Option<std::path::PathBuf>| opt(p.as_ref().map(|p| p.display().to_string()));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Dataset".to_string(), opt(h.dataset.map(|d| d.to_string()))]);
    table.add_row(vec!["Source".to_string(), opt(h.source_endpoint_template.clone())]);
    table.add_row(vec!["Output".to_string(), path(&h.output_path)]);
    table.add_row(vec![
        "Checkpoint".to_string(),
        h.checkpoint_path.as_ref().map_or_else(
            || "<output>.checkpoint.json".to_string(),
            |p| p.display().to_string(),
        ),
    ]);
    table.add_row(vec![
        "Privacy policy".to_string(),
        h.privacy_policy_path
            .as_ref()
            .map_or_else(|| "dataset default".to_string(), |p| p.display().to_string()),
    ]);
    table.add_row(vec![
        "Units".to_string(),
        match (&h.units_path, &h.range) {
            (Some(p), _) => p.display().to_string(),
            (None, Some(r)) => format!("range {r}"),
            (None, None) => "not set".to_string(),
        },
    ]);
    table.add_row(vec![
        "Rate limit".to_string(),
        format!("{}/s (burst {})", h.rate_limit_per_second, h.rate_limit_burst),
    ]);
    table.add_row(vec![
        "Flush".to_string(),
        format!("every {} units or {}s", h.batch_size, h.flush_interval_secs),
    ]);
    table.add_row(vec![
        "Retries".to_string(),
        format!(
            "{} ({}ms → {}ms)",
            h.max_retry_attempts, h.retry_base_delay_ms, h.retry_max_delay_ms
        ),
    ]);
    table.add_row(vec!["Request timeout".to_string(), format!("{}s", h.request_timeout_secs)]);
    table.add_row(vec!["Resume".to_string(), h.resume.to_string()]);
    table.add_row(vec!["Workers".to_string(), h.workers.to_string()]);
    table.add_row(vec![
        "Grid".to_string(),
        format!("{} cells/degree", h.grid_cells_per_degree),
    ]);
    table.add_row(vec!["Series layout".to_string(), h.series_layout.to_string()]);
    table.add_row(vec!["Zstd level".to_string(), h.zstd_level.to_string()]);
    table.add_row(vec![
        "Alarm threshold".to_string(),
        opt(h.alarm_threshold.map(|t| format!("{:.0}%", t * 100.0))),
    ]);
    table.add_row(vec![
        "Sample limit".to_string(),
        opt(h.sample_limit.map(|n| n.to_string())),
    ]);
    table.add_row(vec![
        "API key".to_string(),
        match (&h.api_key_env, &config.http.api_key) {
            (Some(var), _) => format!("${var} → {}", config.http.api_key_header),
            (None, Some(_)) => format!("configured → {}", config.http.api_key_header),
            (None, None) => "not set".to_string(),
        },
    ]);
    table
}
