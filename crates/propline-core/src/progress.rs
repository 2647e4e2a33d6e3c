//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif bar for the unit list (position, success rate, ETA).
//! Non-TTY mode: bars are hidden and the harvester logs periodic progress lines.

use std::collections::VecDeque;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Unit bar (green bar, counts, free-form message for success rate and ETA)
fn unit_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<12.cyan.bold} {bar:30.green/dim} {pos:>7}/{len:7} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Context with bars forced on or off
    pub fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Bar over the unit list. Hidden (no-op) outside a TTY.
    pub fn unit_bar(&self, dataset: &str, total: u64) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(unit_style());
        pb.set_prefix(dataset.to_string());
        pb
    }

    /// Spinner line for a single long step (e.g. compaction).
    ///
    /// Update with `pb.set_message(...)`, stop with `pb.finish_and_clear()`.
    pub fn stage_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}")
                .expect("invalid template"),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Completion timestamps over a trailing window, for throughput-based ETA
#[derive(Debug)]
pub struct ThroughputWindow {
    span: Duration,
    max_samples: usize,
    samples: VecDeque<Instant>,
}

impl ThroughputWindow {
    pub fn new(span: Duration, max_samples: usize) -> Self {
        Self {
            span,
            max_samples: max_samples.max(2),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.samples.push_back(at);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if at.saturating_duration_since(*front) > self.span && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Units per second across the window, once two completions are known
    pub fn rate(&self) -> Option<f64> {
        let (first, last) = (self.samples.front()?, self.samples.back()?);
        let secs = last.saturating_duration_since(*first).as_secs_f64();
        (self.samples.len() >= 2 && secs > 0.0).then(|| (self.samples.len() - 1) as f64 / secs)
    }
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), 500)
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Units in this run's list (after resume and sample limit)
    pub total: u64,
    pub attempted: u64,
    pub succeeded: u64,
    pub elapsed: Duration,
    /// Units per second over the trailing window
    pub throughput: Option<f64>,
}

impl ProgressSnapshot {
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempted > 0).then(|| self.succeeded as f64 / self.attempted as f64)
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.attempted)
    }

    pub fn eta(&self) -> Option<Duration> {
        let rate = self.throughput.filter(|r| *r > 0.0)?;
        Some(Duration::from_secs_f64(self.remaining() as f64 / rate))
    }

    /// `"62.5% ok, eta 1h 02m"`
    pub fn message(&self) -> String {
        let rate = self
            .success_rate()
            .map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0));
        let eta = self
            .eta()
            .map_or_else(|| "-".to_string(), fmt_duration);
        format!("{rate} ok, eta {eta}")
    }
}

/// Format number with thousand separators.
pub fn fmt_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Compact duration: `42s`, `7m 05s`, `3h 12m`, `2d 04h`
pub fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {:02}s", secs / 60, secs % 60),
        3600..86400 => format!("{}h {:02}m", secs / 3600, secs % 3600 / 60),
        _ => format!("{}d {:02}h", secs / 86400, secs % 86400 / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_num_small() {
        assert_eq!(fmt_num(0), "0");
        assert_eq!(fmt_num(12), "12");
        assert_eq!(fmt_num(123), "123");
    }

    #[test]
    fn fmt_num_thousands() {
        assert_eq!(fmt_num(1_000), "1,000");
        assert_eq!(fmt_num(123_456), "123,456");
        assert_eq!(fmt_num(1_234_567_890), "1,234,567,890");
    }

    #[test]
    fn fmt_duration_units() {
        assert_eq!(fmt_duration(Duration::from_secs(42)), "42s");
        assert_eq!(fmt_duration(Duration::from_secs(425)), "7m 05s");
        assert_eq!(fmt_duration(Duration::from_secs(3 * 3600 + 720)), "3h 12m");
        assert_eq!(fmt_duration(Duration::from_secs(2 * 86400 + 4 * 3600)), "2d 04h");
    }

    #[test]
    fn window_rate() {
        let mut w = ThroughputWindow::default();
        let t0 = Instant::now();
        assert_eq!(w.rate(), None);
        for i in 0..=10 {
            w.record(t0 + Duration::from_millis(500 * i));
        }
        // 10 intervals over 5s
        let rate = w.rate().unwrap();
        assert!((rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn window_forgets_old_samples() {
        let mut w = ThroughputWindow::new(Duration::from_secs(10), 100);
        let t0 = Instant::now();
        // Slow start, then fast
        w.record(t0);
        w.record(t0 + Duration::from_secs(100));
        for i in 1..=20 {
            w.record(t0 + Duration::from_secs(100) + Duration::from_millis(100 * i));
        }
        assert!(w.rate().unwrap() > 5.0);
    }

    #[test]
    fn snapshot_eta() {
        let snap = ProgressSnapshot {
            total: 100,
            attempted: 40,
            succeeded: 30,
            elapsed: Duration::from_secs(20),
            throughput: Some(2.0),
        };
        assert_eq!(snap.success_rate(), Some(0.75));
        assert_eq!(snap.eta(), Some(Duration::from_secs(30)));
        assert_eq!(snap.message(), "75.0% ok, eta 30s");
    }

    #[test]
    fn hidden_bar_outside_tty() {
        let ctx = ProgressContext::with_tty(false);
        assert!(ctx.unit_bar("addresses", 10).is_hidden());
    }
}
