//! `propline compact` - re-run type inference and compression over an output

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use propline_core::{Compactor, DatasetLock, SharedProgress, output_stats};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CompactArgs {
    /// Output Parquet file
    #[arg(short, long)]
    pub output_path: Option<PathBuf>,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,
}

pub fn run(args: CompactArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let output = super::output_path(args.output_path, config)?;
    let zstd_level = args.zstd_level.unwrap_or(config.harvest.zstd_level);
    if !(1..=22).contains(&zstd_level) {
        anyhow::bail!("zstd_level must be 1-22, got {zstd_level}");
    }
    anyhow::ensure!(output.exists(), "{} does not exist", output.display());

    let _lock = DatasetLock::acquire(&output)?;
    let before = output_stats(&output)?;
    let line = progress.stage_line("compact");
    line.set_message(format!("{} rows", before.rows));
    let after = Compactor::new(&output, zstd_level, config.harvest.series_layout)
        .recompact()
        .with_context(|| format!("failed to compact {}", output.display()));
    line.finish_and_clear();
    let after = after?;

    log::info!("Compacted {} at zstd level {zstd_level}", output.display());
    let table = super::summary_table(
        "Compact",
        &[
            ("Rows", after.rows.to_string()),
            ("Columns", after.columns.to_string()),
            (
                "Size",
                format!("{} → {} bytes", before.compressed_bytes, after.compressed_bytes),
            ),
        ],
    );
    eprintln!("\n{table}");
    Ok(())
}
