use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

const PAUSE_SLICE: Duration = Duration::from_millis(100);

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::{DiscoveredItem, ItemId, ItemKind};
use crate::downloader::Downloader;
use crate::error::CategoryError;
use crate::ledger::FailureState;
use crate::staleness::{StalenessAdvisory, threshold_from_days, DEFAULT_STALE_DAYS};
use crate::store::{RunState, StateStore};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Stop after this many successful downloads; 0 means unlimited.
    pub max_downloads: usize,
    pub delay: Duration,
    pub stale_days: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_downloads: 0,
            delay: Duration::from_secs(1),
            stale_days: DEFAULT_STALE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub standalone_downloaded: usize,
    pub episodes_downloaded: usize,
    pub series_checked: usize,
    pub skipped_seen: usize,
    pub skipped_permanent: usize,
    pub failed: usize,
    pub newly_permanent: usize,
    pub permanent_failures: Vec<ItemId>,
    pub advisories: Vec<StalenessAdvisory>,
    /// Downloads a dry run would have started, in order.
    pub planned: Vec<ItemId>,
    pub interrupted: bool,
    pub limit_reached: bool,
}

impl RunReport {
    pub fn downloaded(&self) -> usize {
        self.standalone_downloaded + self.episodes_downloaded
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkResult {
    pub id: ItemId,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailingEntry {
    pub id: ItemId,
    pub consecutive_run_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub seen: usize,
    pub episodes: usize,
    pub tracked_series: usize,
    pub failing: Vec<FailingEntry>,
    pub permanent: Vec<ItemId>,
    pub advisories: Vec<StalenessAdvisory>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress to the `tracing` subscriber.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "{}",
                event.message
            ),
            None => info!("{}", event.message),
        }
    }
}

enum Attempt {
    Succeeded,
    Failed(String),
    /// A stop was requested between the first attempt and its retry.
    Interrupted,
}

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Drives one run: decides per item, downloads, and persists state after
/// every change.
pub struct Orchestrator<S: StateStore, D: Downloader> {
    state: RunState,
    store: S,
    downloader: D,
    cancel: CancelToken,
    options: RunOptions,
    clock: Clock,
    reported_permanent: HashSet<ItemId>,
    /// Ids already decided this run; later occurrences are ignored.
    handled: HashSet<ItemId>,
}

impl<S: StateStore, D: Downloader> Orchestrator<S, D> {
    pub fn new(state: RunState, store: S, downloader: D, cancel: CancelToken, options: RunOptions) -> Self {
        Self {
            state,
            store,
            downloader,
            cancel,
            options,
            clock: Box::new(Utc::now),
            reported_permanent: HashSet::new(),
            handled: HashSet::new(),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    pub fn run(
        &mut self,
        items: &[DiscoveredItem],
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, CategoryError> {
        let start = Instant::now();
        let mut report = RunReport {
            dry_run: self.options.dry_run,
            ..RunReport::default()
        };
        self.reported_permanent.clear();
        self.handled.clear();

        for (index, item) in items.iter().enumerate() {
            if self.should_stop(&mut report) {
                break;
            }
            sink.event(ProgressEvent {
                message: format!(
                    "[{}/{}] {}: {}",
                    index + 1,
                    items.len(),
                    item.kind_label(),
                    item.name
                ),
                elapsed: None,
            });
            let attempted = match &item.kind {
                ItemKind::Standalone => self.process_standalone(item, &mut report, sink)?,
                ItemKind::SeriesParent { children } => {
                    self.process_series(item, children, &mut report, sink)?
                }
            };
            if attempted && index + 1 < items.len() {
                self.pause();
            }
        }

        let now = self.now();
        let threshold = threshold_from_days(self.options.stale_days);
        report.advisories = self
            .state
            .series
            .advisories(now, threshold)
            .filter(|advisory| !self.state.seen.contains(&advisory.series))
            .collect();
        for advisory in &report.advisories {
            warn!("stale series: {}", advisory.message());
        }

        sink.event(ProgressEvent {
            message: format!(
                "run finished: {} downloaded, {} failed",
                report.downloaded(),
                report.failed
            ),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    fn should_stop(&self, report: &mut RunReport) -> bool {
        if self.cancel.is_cancelled() {
            if !report.interrupted {
                info!("stopping as requested");
            }
            report.interrupted = true;
            return true;
        }
        let limit = self.options.max_downloads;
        if limit > 0 && report.downloaded() >= limit {
            if !report.limit_reached {
                info!(limit, "download limit reached; stopping");
            }
            report.limit_reached = true;
            return true;
        }
        false
    }

    fn pause(&self) {
        if self.options.dry_run {
            return;
        }
        let deadline = Instant::now() + self.options.delay;
        while !self.cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Returns whether a download was attempted.
    fn process_standalone(
        &mut self,
        item: &DiscoveredItem,
        report: &mut RunReport,
        sink: &dyn ProgressSink,
    ) -> Result<bool, CategoryError> {
        let id = &item.id;
        if self.state.seen.contains(id) {
            sink.event(ProgressEvent {
                message: "skipped (already seen)".to_string(),
                elapsed: None,
            });
            report.skipped_seen += 1;
            return Ok(false);
        }
        if self.state.ledger.is_permanent(id) {
            report.skipped_permanent += 1;
            self.note_permanent(id, report);
            return Ok(false);
        }
        if !self.handled.insert(id.clone()) {
            debug!(item = %id, "already handled this run");
            return Ok(false);
        }

        match self.attempt(id, report, sink) {
            Attempt::Succeeded => {
                if !self.options.dry_run {
                    if self.state.seen.add(id.clone()) {
                        self.store.save_seen(&self.state.seen)?;
                    }
                    self.clear_failures(id)?;
                }
                report.standalone_downloaded += 1;
            }
            Attempt::Failed(message) => self.record_failure(id, message, report)?,
            Attempt::Interrupted => {}
        }
        Ok(true)
    }

    fn process_series(
        &mut self,
        item: &DiscoveredItem,
        children: &[ItemId],
        report: &mut RunReport,
        sink: &dyn ProgressSink,
    ) -> Result<bool, CategoryError> {
        let id = &item.id;
        if self.state.seen.contains(id) {
            sink.event(ProgressEvent {
                message: "skipped (series marked complete)".to_string(),
                elapsed: None,
            });
            report.skipped_seen += 1;
            return Ok(false);
        }
        if !self.handled.insert(id.clone()) {
            debug!(series = %id, "already checked this run");
            return Ok(false);
        }
        report.series_checked += 1;

        let mut pending = Vec::new();
        let mut permanent = 0usize;
        for child in children {
            if self.state.episodes.contains(child) {
                continue;
            }
            if self.state.ledger.is_permanent(child) {
                permanent += 1;
                self.note_permanent(child, report);
                continue;
            }
            // Shared or repeated episodes get one attempt per run.
            if !self.handled.insert(child.clone()) {
                continue;
            }
            pending.push(child);
        }
        report.skipped_permanent += permanent;
        sink.event(ProgressEvent {
            message: format!(
                "episodes: {} total, {} new, {} permanently failed",
                children.len(),
                pending.len(),
                permanent
            ),
            elapsed: None,
        });

        let mut downloaded = 0usize;
        let mut completed = true;
        for (index, child) in pending.iter().enumerate() {
            if self.should_stop(report) {
                completed = false;
                break;
            }
            sink.event(ProgressEvent {
                message: format!("episode [{}/{}]: {}", index + 1, pending.len(), child),
                elapsed: None,
            });
            match self.attempt(child, report, sink) {
                Attempt::Succeeded => {
                    if !self.options.dry_run {
                        if self.state.episodes.add((*child).clone()) {
                            self.store.save_episodes(&self.state.episodes)?;
                        }
                        self.clear_failures(child)?;
                    }
                    report.episodes_downloaded += 1;
                    downloaded += 1;
                }
                Attempt::Failed(message) => self.record_failure(child, message, report)?,
                Attempt::Interrupted => {
                    completed = false;
                    break;
                }
            }
            if index + 1 < pending.len() {
                self.pause();
            }
        }

        // A check cut short with nothing new proves nothing about the series.
        if !self.options.dry_run && (completed || downloaded > 0) {
            let now = self.now();
            let threshold = threshold_from_days(self.options.stale_days);
            let advisory = self
                .state
                .series
                .observe(id, &item.name, downloaded, now, threshold);
            self.store.save_series(&self.state.series)?;
            if let Some(advisory) = advisory {
                info!("{}", advisory.message());
            }
        }
        Ok(!pending.is_empty())
    }

    fn attempt(&mut self, id: &ItemId, report: &mut RunReport, sink: &dyn ProgressSink) -> Attempt {
        if self.options.dry_run {
            sink.event(ProgressEvent {
                message: format!("(dry-run) would download {id}"),
                elapsed: None,
            });
            report.planned.push(id.clone());
            return Attempt::Succeeded;
        }

        let start = Instant::now();
        let first = match self.downloader.download(id) {
            Ok(()) => {
                sink.event(ProgressEvent {
                    message: format!("downloaded {id}"),
                    elapsed: Some(start.elapsed()),
                });
                return Attempt::Succeeded;
            }
            Err(err) => err,
        };
        if self.cancel.is_cancelled() {
            warn!(item = %id, error = %first, "download failed; not retrying because a stop was requested");
            return Attempt::Interrupted;
        }

        info!(item = %id, error = %first, "download failed; retrying once");
        match self.downloader.download(id) {
            Ok(()) => {
                sink.event(ProgressEvent {
                    message: format!("downloaded {id} on retry"),
                    elapsed: Some(start.elapsed()),
                });
                Attempt::Succeeded
            }
            Err(err) => Attempt::Failed(err.to_string()),
        }
    }

    fn clear_failures(&mut self, id: &ItemId) -> Result<(), CategoryError> {
        if self.state.ledger.record_success(id) {
            self.store.save_ledger(&self.state.ledger)?;
        }
        Ok(())
    }

    fn record_failure(
        &mut self,
        id: &ItemId,
        message: String,
        report: &mut RunReport,
    ) -> Result<(), CategoryError> {
        let now = self.now();
        let state = self.state.ledger.record_failure(id, message.clone(), now);
        self.store.save_ledger(&self.state.ledger)?;
        report.failed += 1;
        match state {
            FailureState::Permanent => {
                report.newly_permanent += 1;
                warn!(
                    item = %id,
                    error = %message,
                    "permanent failure after {} failed runs; excluded until its ledger entry is cleared",
                    crate::ledger::PERMANENT_AFTER_RUNS
                );
                self.reported_permanent.insert(id.clone());
                report.permanent_failures.push(id.clone());
            }
            FailureState::Failing(count) => {
                warn!(item = %id, error = %message, failures = count, "download failed; will retry next run");
            }
            FailureState::Healthy => {}
        }
        Ok(())
    }

    fn note_permanent(&mut self, id: &ItemId, report: &mut RunReport) {
        if !self.reported_permanent.insert(id.clone()) {
            return;
        }
        warn!(item = %id, "skipping permanently failed item; clear its ledger entry to retry");
        report.permanent_failures.push(id.clone());
    }
}

/// Adds `id` to the seen store so it is never attempted again.
pub fn mark_complete<S: StateStore>(store: &S, id: &ItemId) -> Result<MarkResult, CategoryError> {
    let mut seen = store.load_seen()?;
    let changed = seen.add(id.clone());
    if changed {
        store.save_seen(&seen)?;
    }
    Ok(MarkResult {
        id: id.clone(),
        changed,
    })
}

pub fn unmark_complete<S: StateStore>(store: &S, id: &ItemId) -> Result<MarkResult, CategoryError> {
    let mut seen = store.load_seen()?;
    let changed = seen.remove(id);
    if changed {
        store.save_seen(&seen)?;
    }
    Ok(MarkResult {
        id: id.clone(),
        changed,
    })
}

pub fn status(state: &RunState, now: DateTime<Utc>, stale_days: u32) -> StatusReport {
    let threshold = threshold_from_days(stale_days);
    StatusReport {
        seen: state.seen.len(),
        episodes: state.episodes.len(),
        tracked_series: state.series.len(),
        failing: state
            .ledger
            .iter()
            .filter(|(_, record)| !record.permanent && record.consecutive_run_failures > 0)
            .map(|(id, record)| FailingEntry {
                id: id.clone(),
                consecutive_run_failures: record.consecutive_run_failures,
                last_error: record.last_error.clone(),
            })
            .collect(),
        permanent: state.ledger.permanent_ids().cloned().collect(),
        advisories: state
            .series
            .advisories(now, threshold)
            .filter(|advisory| !state.seen.contains(&advisory.series))
            .collect(),
    }
}
