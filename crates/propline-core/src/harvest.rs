//! Harvest orchestrator: fetch → normalize → filter → flatten → buffer → flush.
//!
//! A flush writes the output first and the checkpoint second, so a restarted
//! run never sees a cursor ahead of the durable output. Per-unit failures are
//! counted as skips; only persistence, lock and config errors end a run early.
//!
//! With `workers > 1` units are fetched on a rayon pool. Results are reordered
//! and committed only as a contiguous prefix, so the cursor never jumps over a
//! unit that is still in flight.

use std::collections::BTreeMap;
use std::sync::mpsc::sync_channel;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use indicatif::ProgressBar;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::compact::{Compactor, output_stats};
use crate::config::HarvestConfig;
use crate::error::{HarvestError, PersistenceError, SkipReason};
use crate::lock::DatasetLock;
use crate::normalize::{Normalizer, flatten};
use crate::privacy::PrivacyPolicy;
use crate::progress::{ProgressSnapshot, SharedProgress, ThroughputWindow, fmt_num};
use crate::rate_limit::RateLimiter;
use crate::record::{OutputBatch, OutputRow};
use crate::shutdown::Shutdown;
use crate::sink::cleanup_tmp_files;
use crate::source::{RateLimitedSource, SourceClient, UnitRef};
use crate::stats::{RunStatus, RunSummary};
use crate::work_queue::WorkQueue;

/// Progress log interval when no bar is shown
const LOG_INTERVAL: Duration = Duration::from_secs(30);

enum UnitOutcome {
    Rows(Vec<OutputRow>),
    Skipped(SkipReason),
}

#[derive(Debug, Default)]
struct Tracker {
    started: Option<Instant>,
    total: u64,
    attempted: u64,
    succeeded: u64,
    window: ThroughputWindow,
}

impl Tracker {
    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            attempted: self.attempted,
            succeeded: self.succeeded,
            elapsed: self.started.map_or(Duration::ZERO, |t| t.elapsed()),
            throughput: self.window.rate(),
        }
    }
}

/// Mutable state of one `run`, owned by the committing thread
struct RunState {
    /// Last checkpoint written (or loaded)
    saved: Checkpoint,
    /// Cursor after every committed unit
    next_cursor: u64,
    pending_rows: Vec<OutputRow>,
    pending_units: u64,
    pending_succeeded: u64,
    merge_existing: bool,
    last_flush: Instant,
    last_log: Instant,
    summary: RunSummary,
}

impl RunState {
    fn flush_due(&self, batch_size: usize, interval: Duration) -> bool {
        self.pending_units >= batch_size as u64
            || (self.pending_units > 0 && self.last_flush.elapsed() >= interval)
    }
}

pub struct Harvester<C, N> {
    config: HarvestConfig,
    source: RateLimitedSource<C>,
    normalizer: N,
    policy: PrivacyPolicy,
    compactor: Compactor,
    checkpoints: CheckpointStore,
    shutdown: Shutdown,
    progress: Option<SharedProgress>,
    tracker: Mutex<Tracker>,
}

impl<C: SourceClient, N: Normalizer> Harvester<C, N> {
    pub fn new(
        config: HarvestConfig,
        client: C,
        normalizer: N,
        policy: PrivacyPolicy,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        let limiter = RateLimiter::new(config.rate_limit_per_second, config.rate_limit_burst);
        let source = RateLimitedSource::new(client, limiter, config.retry);
        let compactor =
            Compactor::new(&config.output_path, config.zstd_level, config.series_layout);
        let checkpoints = CheckpointStore::new(config.checkpoint_path());
        Ok(Self {
            config,
            source,
            normalizer,
            policy,
            compactor,
            checkpoints,
            shutdown: Shutdown::new(),
            progress: None,
            tracker: Mutex::new(Tracker::default()),
        })
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Current progress of the running (or last) `run`
    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Harvest `units` from the checkpointed cursor to the end of the list.
    ///
    /// `Ok` covers both completion and a clean interruption (see
    /// [`RunSummary::status`]). `Err` means the run aborted; the last saved
    /// checkpoint is still valid for a resume.
    pub fn run(&self, units: &[UnitRef]) -> Result<RunSummary, HarvestError> {
        let started = Instant::now();
        let dataset = self.normalizer.dataset();
        let _lock = DatasetLock::acquire(&self.config.output_path)?;
        cleanup_tmp_files(&[&self.config.output_path, self.checkpoints.path()])
            .map_err(|e| PersistenceError::io(&self.config.output_path, e))?;

        if self.config.resume {
            if let Some(existing) = self.compactor.existing_layout()? {
                if existing != self.config.series_layout {
                    return Err(HarvestError::Config(format!(
                        "{} was written with the {existing} series layout, not {}; \
                         resume with the same layout or start a fresh run",
                        self.config.output_path.display(),
                        self.config.series_layout
                    )));
                }
            }
        }

        let units = match self.config.sample_limit {
            Some(limit) if limit < units.len() => {
                log::info!("{dataset}: sample_limit {limit} of {} units", units.len());
                &units[..limit]
            }
            _ => units,
        };
        let total = units.len() as u64;

        let saved = if self.config.resume {
            self.checkpoints.load()?
        } else {
            log::info!("{dataset}: fresh run, ignoring any saved checkpoint");
            Checkpoint::default()
        };
        if saved.cursor > total {
            log::warn!(
                "{dataset}: checkpoint cursor {} is beyond the {} listed units",
                saved.cursor,
                total
            );
        }
        let start = saved.cursor.min(total);
        if start > 0 {
            log::info!(
                "{dataset}: resuming at unit {} of {} ({} / {} succeeded so far)",
                fmt_num(start),
                fmt_num(total),
                fmt_num(saved.total_succeeded),
                fmt_num(saved.total_attempted)
            );
        } else {
            log::info!("{dataset}: {} units", fmt_num(total));
        }

        *self.tracker.lock().unwrap_or_else(PoisonError::into_inner) = Tracker {
            started: Some(started),
            total: total - start,
            ..Tracker::default()
        };

        let mut summary = RunSummary::new(dataset, total, start);
        summary.total_attempted = saved.total_attempted;
        summary.total_succeeded = saved.total_succeeded;
        let mut state = RunState {
            saved,
            next_cursor: start,
            pending_rows: Vec::new(),
            pending_units: 0,
            pending_succeeded: 0,
            merge_existing: self.config.resume,
            last_flush: Instant::now(),
            last_log: Instant::now(),
            summary,
        };

        let bar = self
            .progress
            .as_ref()
            .map_or_else(ProgressBar::hidden, |p| p.unit_bar(dataset, total));
        bar.set_position(start);

        let interrupted = if self.config.workers <= 1 {
            self.run_sequential(units, &mut state, &bar)
        } else {
            self.run_pooled(units, &mut state, &bar)
        };
        let interrupted = match interrupted {
            Ok(i) => i,
            Err(e) => {
                bar.abandon();
                return Err(e);
            }
        };

        // Drain: flush what is buffered. A fresh run always writes, so stale
        // output from an earlier run is replaced even if nothing was processed.
        if state.pending_units > 0 || !state.merge_existing {
            if let Err(e) = self.flush(&mut state) {
                bar.abandon();
                return Err(e);
            }
        }
        bar.finish_and_clear();

        let mut summary = state.summary;
        if summary.flushes == 0 && self.config.output_path.exists() {
            match output_stats(&self.config.output_path) {
                Ok(stats) => summary.output = stats,
                Err(e) => log::warn!("Cannot read output stats: {e}"),
            }
        }
        summary.status = if interrupted {
            RunStatus::Interrupted
        } else {
            RunStatus::Complete
        };
        summary.elapsed = started.elapsed();
        if interrupted {
            log::warn!(
                "{dataset}: interrupted at unit {} of {}; checkpoint saved",
                fmt_num(summary.cursor),
                fmt_num(total)
            );
        }
        Ok(summary)
    }

    /// Returns true when stopped by a shutdown request before the end of the list
    fn run_sequential(
        &self,
        units: &[UnitRef],
        state: &mut RunState,
        bar: &ProgressBar,
    ) -> Result<bool, HarvestError> {
        let start = state.next_cursor as usize;
        for unit in &units[start..] {
            if self.shutdown.is_requested() {
                return Ok(true);
            }
            let outcome = self.process(unit);
            self.commit(state, outcome, bar);
            if state.flush_due(self.config.batch_size, self.config.flush_interval) {
                self.flush(state)?;
            }
        }
        Ok(false)
    }

    fn run_pooled(
        &self,
        units: &[UnitRef],
        state: &mut RunState,
        bar: &ProgressBar,
    ) -> Result<bool, HarvestError> {
        let start = state.next_cursor as usize;
        let workers = self.config.workers;
        let queue = WorkQueue::new(units[start..].iter().collect());

        // One extra thread: the scope body below blocks on the channel
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers + 1)
            .thread_name(|i| format!("harvest-{i}"))
            .build()
            .map_err(|e| HarvestError::Config(format!("cannot build worker pool: {e}")))?;
        let (tx, rx) = sync_channel::<(usize, UnitOutcome)>(workers * 4);

        pool.scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                s.spawn(move |_| {
                    while !self.shutdown.is_requested() {
                        let Some((pos, unit)) = queue.next() else {
                            break;
                        };
                        let outcome = self.process(unit);
                        // Receiver gone: the run is aborting
                        if tx.send((start + pos, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut reorder: BTreeMap<usize, UnitOutcome> = BTreeMap::new();
            for (pos, outcome) in rx {
                reorder.insert(pos, outcome);
                while let Some(outcome) = reorder.remove(&(state.next_cursor as usize)) {
                    self.commit(state, outcome, bar);
                    if state.flush_due(self.config.batch_size, self.config.flush_interval) {
                        self.flush(state)?;
                    }
                }
            }
            if !reorder.is_empty() {
                log::warn!("{} results after a gap were not committed", reorder.len());
            }
            Ok::<(), HarvestError>(())
        })?;

        Ok(self.shutdown.is_requested() && (state.next_cursor as usize) < units.len())
    }

    /// Fetch, normalize, filter and flatten one unit. Never fails the run.
    fn process(&self, unit: &UnitRef) -> UnitOutcome {
        let raw = match self.source.fetch(unit) {
            Ok(raw) => raw,
            Err(e) => {
                let reason = e.skip_reason();
                match reason {
                    SkipReason::Permanent(_) => log::debug!("{}: skipped: {e}", unit.key),
                    _ => log::warn!("{}: skipped: {e}", unit.key),
                }
                return UnitOutcome::Skipped(reason);
            }
        };

        match self.normalizer.normalize(&raw) {
            Ok(record) => {
                let filtered = self.policy.apply(record);
                UnitOutcome::Rows(flatten(
                    &filtered,
                    self.config.series_layout,
                    self.config.grid,
                ))
            }
            Err(e) => {
                log::warn!("{}: normalization failed ({})", raw.reference(), e.kind());
                UnitOutcome::Skipped(SkipReason::Normalize(e.kind()))
            }
        }
    }

    /// Add the next unit (in cursor order) to the pending batch
    fn commit(&self, state: &mut RunState, outcome: UnitOutcome, bar: &ProgressBar) {
        state.next_cursor += 1;
        state.pending_units += 1;
        state.summary.attempted += 1;
        let ok = match outcome {
            UnitOutcome::Rows(rows) => {
                state.pending_rows.extend(rows);
                state.pending_succeeded += 1;
                state.summary.succeeded += 1;
                true
            }
            UnitOutcome::Skipped(reason) => {
                state.summary.record_skip(reason);
                false
            }
        };

        let snapshot = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.attempted += 1;
            tracker.succeeded += u64::from(ok);
            tracker.window.record(Instant::now());
            tracker.snapshot()
        };

        bar.inc(1);
        bar.set_message(snapshot.message());
        if bar.is_hidden() && state.last_log.elapsed() >= LOG_INTERVAL {
            state.last_log = Instant::now();
            log::info!(
                "{}: {}/{} units, {}",
                self.normalizer.dataset(),
                fmt_num(state.next_cursor),
                fmt_num(state.summary.units_total),
                snapshot.message()
            );
        }
    }

    /// Write pending rows, then advance and save the checkpoint
    fn flush(&self, state: &mut RunState) -> Result<(), HarvestError> {
        let batch = OutputBatch {
            rows: std::mem::take(&mut state.pending_rows),
            cursor: state.next_cursor,
        };
        let output = self.compactor.flush(batch, state.merge_existing)?;

        let checkpoint = Checkpoint {
            cursor: state.next_cursor,
            total_attempted: state.saved.total_attempted + state.pending_units,
            total_succeeded: state.saved.total_succeeded + state.pending_succeeded,
            last_updated: Utc::now(),
        };
        self.checkpoints.save(&checkpoint)?;
        log::debug!(
            "{}: checkpoint at cursor {} ({output})",
            self.normalizer.dataset(),
            checkpoint.cursor
        );

        state.summary.cursor = checkpoint.cursor;
        state.summary.total_attempted = checkpoint.total_attempted;
        state.summary.total_succeeded = checkpoint.total_succeeded;
        state.summary.flushes += 1;
        state.summary.output = output;
        state.saved = checkpoint;
        state.pending_units = 0;
        state.pending_succeeded = 0;
        state.merge_existing = true;
        state.last_flush = Instant::now();
        Ok(())
    }
}

impl<C, N> std::fmt::Debug for Harvester<C, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("dataset", &self.config.dataset)
            .field("output", &self.config.output_path)
            .finish_non_exhaustive()
    }
}
