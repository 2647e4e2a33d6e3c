pub mod compact;
pub mod run;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::config::Config;

/// Key-value table with a cyan header
pub fn summary_table(title: &str, rows: &[(&str, String)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    table
}

/// `--output-path`, else `[harvest].output_path`
pub fn output_path(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    flag.or_else(|| config.harvest.output_path.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("output_path is required (--output-path or [harvest].output_path)")
        })
}
