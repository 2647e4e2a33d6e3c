//! `propline status` - checkpoint and output summary for one dataset

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use propline_core::config::default_checkpoint_path;
use propline_core::progress::fmt_num;
use propline_core::{CheckpointStore, DatasetLock, output_stats};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output Parquet file
    #[arg(short, long)]
    pub output_path: Option<PathBuf>,

    /// Checkpoint file (default: <output>.checkpoint.json)
    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let output = super::output_path(args.output_path, config)?;
    let checkpoint_path = args
        .checkpoint_path
        .or_else(|| config.harvest.checkpoint_path.clone())
        .unwrap_or_else(|| default_checkpoint_path(&output));
    let rows = status_rows(&output, &checkpoint_path)?;
    let table = super::summary_table("Status", &rows);
    eprintln!("\n{table}");
    Ok(())
}

fn status_rows(output: &Path, checkpoint_path: &Path) -> Result<Vec<(&'static str, String)>> {
    let mut rows = vec![("Checkpoint", checkpoint_path.display().to_string())];

    if checkpoint_path.exists() {
        let checkpoint = CheckpointStore::new(checkpoint_path).load()?;
        rows.push(("Cursor", fmt_num(checkpoint.cursor)));
        rows.push((
            "Succeeded",
            format!(
                "{} / {} ({})",
                fmt_num(checkpoint.total_succeeded),
                fmt_num(checkpoint.total_attempted),
                checkpoint
                    .success_rate()
                    .map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0))
            ),
        ));
        rows.push((
            "Last updated",
            checkpoint.last_updated.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ));
    } else {
        rows.push(("Cursor", "no checkpoint".to_string()));
    }

    rows.push(("Output", output.display().to_string()));
    if output.exists() {
        let stats = output_stats(output)?;
        rows.push((
            "Rows x columns",
            format!("{} x {}", fmt_num(stats.rows as u64), stats.columns),
        ));
        rows.push((
            "Size",
            format!(
                "{} bytes ({} uncompressed)",
                fmt_num(stats.compressed_bytes),
                fmt_num(stats.uncompressed_bytes)
            ),
        ));
    } else {
        rows.push(("Rows x columns", "not written yet".to_string()));
    }

    let holder = DatasetLock::holder(output)
        .map_or_else(|| "free".to_string(), |holder| holder.to_string());
    rows.push(("Lock", holder));
    Ok(rows)
}
