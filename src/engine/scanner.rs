//! Scan orchestrator.
//!
//! Fans the roster out over a bounded pool of per-symbol units, gathers
//! their signals, tags and ranks them, then replaces the scan snapshot in
//! one atomic write. A unit's failure (read error, panic, deadline) is
//! recorded in its [`UnitReport`] and never aborts the run.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::calculator::{check_series, BreakoutCalculator, SeriesCheck};
use super::integrity;
use crate::config::{AppConfig, BreakoutConfig};
use crate::market::{Clock, MarketContext, MarketStateResolver};
use crate::storage::universe::load_roster;
use crate::storage::{ScanStore, SeriesSource};
use crate::types::{BreakoutSignal, RosterEntry, ScanError};

const DEFAULT_MAX_WORKERS: usize = 20;
const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Unit results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Signals(usize),
    NoSignal,
    NoData,
    InsufficientData,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub exchange: String,
    pub symbol: String,
    pub outcome: UnitOutcome,
}

impl UnitReport {
    fn new(entry: &RosterEntry, outcome: UnitOutcome) -> Self {
        Self {
            exchange: entry.exchange.clone(),
            symbol: entry.symbol.clone(),
            outcome,
        }
    }
}

/// Aggregate of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub run_id: String,
    pub started_at: DateTime<FixedOffset>,
    pub finished_at: DateTime<FixedOffset>,
    pub market: MarketContext,
    pub units: usize,
    pub with_signals: usize,
    pub no_signal: usize,
    pub no_data: usize,
    pub insufficient_data: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub total_signals: usize,
    pub confirmed_signals: usize,
    pub inconsistent_signals: usize,
    pub artifact: PathBuf,
    #[serde(skip)]
    pub reports: Vec<UnitReport>,
}

impl ScanSummary {
    /// Reports for units that failed or ran out of time.
    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.reports.iter().filter(|r| {
            matches!(r.outcome, UnitOutcome::Failed(_) | UnitOutcome::TimedOut)
        })
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    fn tally(&mut self) {
        self.units = self.reports.len();
        self.with_signals = self.count(|o| matches!(o, UnitOutcome::Signals(_)));
        self.no_signal = self.count(|o| *o == UnitOutcome::NoSignal);
        self.no_data = self.count(|o| *o == UnitOutcome::NoData);
        self.insufficient_data = self.count(|o| *o == UnitOutcome::InsufficientData);
        self.failed = self.count(|o| matches!(o, UnitOutcome::Failed(_)));
        self.timed_out = self.count(|o| *o == UnitOutcome::TimedOut);
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    source: Arc<dyn SeriesSource>,
    calculator: Arc<BreakoutCalculator>,
    resolver: MarketStateResolver,
    store: ScanStore,
    max_workers: usize,
    unit_timeout: Duration,
}

impl Scanner {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        config: Arc<BreakoutConfig>,
        resolver: MarketStateResolver,
        store: ScanStore,
    ) -> Self {
        Self {
            source,
            calculator: Arc::new(BreakoutCalculator::new(config)),
            resolver,
            store,
            max_workers: DEFAULT_MAX_WORKERS,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }

    /// Build from application config; the snapshot goes to `paths.scan_file()`.
    pub fn from_config(
        config: &AppConfig,
        source: Arc<dyn SeriesSource>,
        resolver: MarketStateResolver,
    ) -> Self {
        Self::new(
            source,
            Arc::new(config.breakout.clone()),
            resolver,
            ScanStore::new(config.paths.scan_file()),
        )
        .with_limits(config.scanner.max_workers, config.scanner.unit_timeout())
    }

    pub fn with_limits(mut self, max_workers: usize, unit_timeout: Duration) -> Self {
        self.max_workers = max_workers.max(1);
        self.unit_timeout = unit_timeout;
        self
    }

    pub fn store(&self) -> &ScanStore {
        &self.store
    }

    /// Load the roster file, then [`run`](Self::run).
    pub async fn run_from_file(
        &self,
        roster_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let roster = load_roster(roster_path).map_err(|e| ScanError::Roster(format!("{e:#}")))?;
        self.run(&roster, cancel).await
    }

    /// Run one full scan over `roster`.
    pub async fn run(
        &self,
        roster: &[RosterEntry],
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let clock = self.resolver.clock().clone();
        let started_at = clock.now().fixed_offset();
        // One context for the whole run, resolved before any unit starts.
        let market = self.resolver.resolve()?;
        let total = roster.len();

        info!(
            units = total,
            workers = self.max_workers,
            market_state = %market.state,
            effective_trade_date = %market.effective_trade_date,
            "Scan started"
        );

        let mut slots = self.execute(roster, &clock, cancel).await?;

        let mut reports = Vec::with_capacity(total);
        let mut signals = Vec::new();
        for (entry, slot) in roster.iter().zip(slots.iter_mut()) {
            match slot.take() {
                Some((report, unit_signals)) => {
                    reports.push(report);
                    signals.extend(unit_signals);
                }
                None => reports.push(UnitReport::new(
                    entry,
                    UnitOutcome::Failed("task aborted".to_string()),
                )),
            }
        }

        let integrity = integrity::tag(&mut signals, &market);
        rank(&mut signals, self.calculator.config());

        self.store.save(&signals).map_err(|e| ScanError::Persistence {
            path: self.store.path().display().to_string(),
            message: format!("{e:#}"),
        })?;

        let mut summary = ScanSummary {
            run_id: format!("scan-{}", uuid::Uuid::new_v4().simple()),
            started_at,
            finished_at: clock.now().fixed_offset(),
            market,
            units: 0,
            with_signals: 0,
            no_signal: 0,
            no_data: 0,
            insufficient_data: 0,
            failed: 0,
            timed_out: 0,
            total_signals: signals.len(),
            confirmed_signals: signals.iter().filter(|s| s.volume_confirmation).count(),
            inconsistent_signals: integrity.inconsistent,
            artifact: self.store.path().to_path_buf(),
            reports,
        };
        summary.tally();

        info!(
            run_id = %summary.run_id,
            units = summary.units,
            with_signals = summary.with_signals,
            no_signal = summary.no_signal,
            no_data = summary.no_data,
            insufficient = summary.insufficient_data,
            failed = summary.failed,
            timed_out = summary.timed_out,
            signals = summary.total_signals,
            confirmed = summary.confirmed_signals,
            "Scan complete"
        );

        Ok(summary)
    }

    /// Run every unit under the worker limit. Slot `i` holds roster entry
    /// `i`'s result; `None` only if its task was lost.
    async fn execute(
        &self,
        roster: &[RosterEntry],
        clock: &Arc<dyn Clock>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<(UnitReport, Vec<BreakoutSignal>)>>, ScanError> {
        let total = roster.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let completed = Arc::new(AtomicUsize::new(0));
        let cancelled = || ScanError::Cancelled {
            completed: completed.load(Ordering::SeqCst),
            total,
        };

        let mut join_set = JoinSet::new();
        for (index, entry) in roster.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.shutdown().await;
                    warn!(completed = completed.load(Ordering::SeqCst), total, "Scan cancelled");
                    return Err(cancelled());
                }
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let unit = Unit {
                entry: entry.clone(),
                source: self.source.clone(),
                calculator: self.calculator.clone(),
                clock: clock.clone(),
            };
            let deadline = self.unit_timeout;
            let completed = completed.clone();

            join_set.spawn(async move {
                let result = unit.run_guarded(deadline).await;
                completed.fetch_add(1, Ordering::SeqCst);
                drop(permit);
                (index, result)
            });
        }

        let mut slots: Vec<Option<(UnitReport, Vec<BreakoutSignal>)>> = vec![None; total];
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.shutdown().await;
                    warn!(completed = completed.load(Ordering::SeqCst), total, "Scan cancelled");
                    return Err(cancelled());
                }
                next = join_set.join_next() => match next {
                    None => break,
                    Some(Ok((index, result))) => slots[index] = Some(result),
                    Some(Err(e)) => warn!(error = %e, "Scan task lost"),
                },
            }
        }

        Ok(slots)
    }
}

/// Stable sort by window priority, then strongest move first. Callers
/// pass signals already in roster order so equal keys stay deterministic.
pub fn rank(signals: &mut [BreakoutSignal], config: &BreakoutConfig) {
    signals.sort_by(|a, b| {
        config
            .priority_of(&a.breakout_type)
            .cmp(&config.priority_of(&b.breakout_type))
            .then_with(|| b.breakout_pct.cmp(&a.breakout_pct))
    });
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

struct Unit {
    entry: RosterEntry,
    source: Arc<dyn SeriesSource>,
    calculator: Arc<BreakoutCalculator>,
    clock: Arc<dyn Clock>,
}

/// Aborts the wrapped task when dropped, so a timed-out or cancelled unit
/// does not keep running in the background.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Unit {
    /// Run on its own task so a panic or overrun is contained to this unit.
    async fn run_guarded(self, deadline: Duration) -> (UnitReport, Vec<BreakoutSignal>) {
        let entry = self.entry.clone();
        let handle = tokio::spawn(self.evaluate());
        let _guard = AbortOnDrop(handle.abort_handle());

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok((outcome, signals))) => (UnitReport::new(&entry, outcome), signals),
            Ok(Err(e)) => {
                let reason = if e.is_panic() { "panicked" } else { "aborted" };
                warn!(instrument = %entry, reason, "Scan unit failed");
                (UnitReport::new(&entry, UnitOutcome::Failed(reason.to_string())), Vec::new())
            }
            Err(_) => {
                warn!(instrument = %entry, deadline_ms = deadline.as_millis() as u64, "Scan unit timed out");
                (UnitReport::new(&entry, UnitOutcome::TimedOut), Vec::new())
            }
        }
    }

    async fn evaluate(self) -> (UnitOutcome, Vec<BreakoutSignal>) {
        let RosterEntry { exchange, symbol, .. } = &self.entry;

        let series = match self.source.load(exchange, symbol).await {
            Ok(s) => s,
            Err(e) => {
                warn!(exchange, symbol, error = %e, "Failed to load series");
                return (UnitOutcome::Failed(format!("{e:#}")), Vec::new());
            }
        };

        if series.is_empty() {
            debug!(exchange, symbol, "No data");
            return (UnitOutcome::NoData, Vec::new());
        }

        match check_series(&series) {
            SeriesCheck::Ready => {}
            check => {
                debug!(exchange, symbol, ?check, "Series not usable");
                return (UnitOutcome::InsufficientData, Vec::new());
            }
        }

        let mut signals = self.calculator.compute(&series);
        if signals.is_empty() {
            return (UnitOutcome::NoSignal, signals);
        }

        let detected_at = self.clock.now().fixed_offset();
        for signal in &mut signals {
            signal.detected_at = Some(detected_at);
        }
        debug!(exchange, symbol, signals = signals.len(), "Breakouts detected");
        (UnitOutcome::Signals(signals.len()), signals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
