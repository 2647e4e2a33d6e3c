//! Run summary: counts, skip reasons, output size

use std::collections::BTreeMap;
use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::compact::CompactStats;
use crate::error::SkipReason;
use crate::progress::{fmt_duration, fmt_num};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every unit in the list was processed
    Complete,
    /// Stopped early by a shutdown request; checkpoint is current
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub dataset: String,
    pub status: RunStatus,
    /// Units in the list after `sample_limit`
    pub units_total: u64,
    /// Cursor this run started from
    pub start_cursor: u64,
    /// Cursor saved by the last flush
    pub cursor: u64,
    /// Units processed by this run
    pub attempted: u64,
    pub succeeded: u64,
    /// Cumulative counters across resumed runs, as checkpointed
    pub total_attempted: u64,
    pub total_succeeded: u64,
    pub skipped: BTreeMap<SkipReason, u64>,
    pub flushes: u64,
    pub output: CompactStats,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(dataset: impl Into<String>, units_total: u64, start_cursor: u64) -> Self {
        Self {
            dataset: dataset.into(),
            status: RunStatus::Complete,
            units_total,
            start_cursor,
            cursor: start_cursor,
            attempted: 0,
            succeeded: 0,
            total_attempted: 0,
            total_succeeded: 0,
            skipped: BTreeMap::new(),
            flushes: 0,
            output: CompactStats::default(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    /// Cumulative success rate; `None` before anything was attempted
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_attempted > 0)
            .then(|| self.total_succeeded as f64 / self.total_attempted as f64)
    }

    /// True when a completed run's success rate is under `threshold`
    pub fn below_alarm(&self, threshold: Option<f64>) -> bool {
        match (self.status, threshold, self.success_rate()) {
            (RunStatus::Complete, Some(t), Some(rate)) => rate < t,
            _ => false,
        }
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(format!("Harvest: {}", self.dataset))
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        let status = match self.status {
            RunStatus::Complete => Cell::new("complete").fg(Color::Green),
            RunStatus::Interrupted => Cell::new("interrupted").fg(Color::Yellow),
        };
        table.add_row(vec![Cell::new("Status"), status, Cell::new("")]);
        table.add_row(vec![
            Cell::new("Cursor"),
            Cell::new(format!(
                "{} → {} of {}",
                fmt_num(self.start_cursor),
                fmt_num(self.cursor),
                fmt_num(self.units_total)
            )),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Attempted"),
            Cell::new(fmt_num(self.attempted)),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Succeeded").fg(Color::Green),
            Cell::new(fmt_num(self.succeeded)).fg(Color::Green),
            Cell::new(format!("{:.1}", pct(self.succeeded, self.attempted))).fg(Color::Green),
        ]);
        for (reason, count) in &self.skipped {
            table.add_row(vec![
                Cell::new(format!("Skipped: {reason}")),
                Cell::new(fmt_num(*count)),
                Cell::new(format!("{:.1}", pct(*count, self.attempted))),
            ]);
        }
        if self.total_attempted != self.attempted {
            table.add_row(vec![
                Cell::new("All runs"),
                Cell::new(format!(
                    "{} / {}",
                    fmt_num(self.total_succeeded),
                    fmt_num(self.total_attempted)
                )),
                Cell::new(format!(
                    "{:.1}",
                    pct(self.total_succeeded, self.total_attempted)
                )),
            ]);
        }
        table.add_row(vec![
            Cell::new("Output"),
            Cell::new(format!(
                "{} rows, {} cols, {} bytes",
                fmt_num(self.output.rows as u64),
                self.output.columns,
                fmt_num(self.output.compressed_bytes)
            )),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Flushes"),
            Cell::new(self.flushes.to_string()),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(fmt_duration(self.elapsed)),
            Cell::new(""),
        ]);

        format!("\n{table}")
    }

    /// Print summary table to stderr (TTY mode).
    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        let skips: Vec<String> = self
            .skipped
            .iter()
            .map(|(reason, n)| format!("{reason}={n}"))
            .collect();
        log::info!(
            "{} {}: {}/{} succeeded, cursor {}/{}, {} flushes, output {} rows / {} bytes [{}]",
            self.dataset,
            match self.status {
                RunStatus::Complete => "complete",
                RunStatus::Interrupted => "interrupted",
            },
            fmt_num(self.succeeded),
            fmt_num(self.attempted),
            fmt_num(self.cursor),
            fmt_num(self.units_total),
            self.flushes,
            fmt_num(self.output.rows as u64),
            fmt_num(self.output.compressed_bytes),
            fmt_duration(self.elapsed)
        );
        if !skips.is_empty() {
            log::info!("{} skipped: {}", self.dataset, skips.join(", "));
        }
    }
}

/// Calculate percentage safely.
fn pct(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        let mut s = RunSummary::new("addresses", 100, 0);
        s.attempted = 100;
        s.succeeded = 70;
        s.total_attempted = 100;
        s.total_succeeded = 70;
        s.cursor = 100;
        for _ in 0..25 {
            s.record_skip(SkipReason::Permanent(Some(404)));
        }
        for _ in 0..5 {
            s.record_skip(SkipReason::RetriesExhausted(Some(503)));
        }
        s
    }

    #[test]
    fn skip_counts() {
        let s = summary();
        assert_eq!(s.skipped_total(), 30);
        assert_eq!(s.skipped[&SkipReason::Permanent(Some(404))], 25);
    }

    #[test]
    fn alarm_only_when_configured() {
        let s = summary();
        assert!(!s.below_alarm(None));
        assert!(!s.below_alarm(Some(0.6)));
        assert!(s.below_alarm(Some(0.8)));
    }

    #[test]
    fn interrupted_runs_never_alarm() {
        let s = RunSummary {
            status: RunStatus::Interrupted,
            ..summary()
        };
        assert!(!s.below_alarm(Some(0.99)));
    }

    #[test]
    fn table_lists_skip_reasons() {
        let table = summary().format_table();
        assert!(table.contains("not found (HTTP 404)"));
        assert!(table.contains("retries exhausted (HTTP 503)"));
        assert!(table.contains("70.0"));
    }

    #[test]
    fn pct_zero_total() {
        assert_eq!(pct(5, 0), 0.0);
    }
}
