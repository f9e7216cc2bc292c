//! Concurrent fetch-and-merge scheduler.
//!
//! Every symbol is queued up front; `concurrency` workers pull from the queue,
//! plan a window, fetch, dedup, and merge independently. Outcomes travel back
//! over a channel. A failing symbol (including a panicking one) never stops
//! the others; the run fails only after every symbol has been attempted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::{Date, UtcOffset};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::data_source::{PriceRequest, SourceError, StockSource};
use crate::dedup::{DedupPolicy, Deduplicated};
use crate::domain::calendar::{iso_date, today_at, SOURCE_UTC_OFFSET};
use crate::freshness::{FreshnessMap, FreshnessTracker};
use crate::sink::{run_blocking, MergeStrategy, Sink, SinkError};
use crate::window::{plan_window, FetchPlan, FetchWindow, SyncParams};
use crate::{PriceRecord, Symbol, UtcDateTime};

/// Engine-wide settings that do not change between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Offset used to decide what "today" is.
    pub source_offset: UtcOffset,
    pub dedup: DedupPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_offset: SOURCE_UTC_OFFSET,
            dedup: DedupPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Merge,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolStatus {
    Current,
    Synced {
        window: FetchWindow,
        fetched: usize,
        written: usize,
        duplicates_dropped: usize,
    },
    Unknown {
        reason: String,
    },
    Failed {
        stage: FailureStage,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolOutcome {
    pub symbol: Symbol,
    #[serde(flatten)]
    pub status: SymbolStatus,
}

/// Result of one scheduler run. Outcomes are ordered by symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub source: &'static str,
    pub sink: &'static str,
    pub merge_strategy: MergeStrategy,
    pub dedup: DedupPolicy,
    pub params: SyncParams,
    #[serde(with = "iso_date")]
    pub today: Date,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub symbols: usize,
    pub synced: usize,
    pub current: usize,
    pub unknown: usize,
    pub failed: usize,
    pub rows_fetched: usize,
    pub rows_written: usize,
    pub duplicates_dropped: usize,
    pub outcomes: Vec<SymbolOutcome>,
}

impl SyncReport {
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn status(&self, symbol: &Symbol) -> Option<&SymbolStatus> {
        self.outcomes
            .iter()
            .find(|outcome| &outcome.symbol == symbol)
            .map(|outcome| &outcome.status)
    }

    pub fn unknown_symbols(&self) -> Vec<&Symbol> {
        self.symbols_where(|status| matches!(status, SymbolStatus::Unknown { .. }))
    }

    pub fn failed_symbols(&self) -> Vec<&Symbol> {
        self.symbols_where(|status| matches!(status, SymbolStatus::Failed { .. }))
    }

    fn symbols_where(&self, predicate: impl Fn(&SymbolStatus) -> bool) -> Vec<&Symbol> {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .map(|outcome| &outcome.symbol)
            .collect()
    }
}

/// Why a single symbol failed.
#[derive(Debug, Clone, Error)]
pub enum SymbolFailure {
    #[error("fetch failed: {0}")]
    Fetch(SourceError),
    #[error("merge failed: {0}")]
    Merge(SinkError),
    #[error("worker task failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// One or more symbols failed; the report covers every symbol.
    #[error("{failed} of {total} symbols failed; first failure on {symbol}: {cause}")]
    SymbolsFailed {
        report: Box<SyncReport>,
        failed: usize,
        total: usize,
        symbol: Symbol,
        #[source]
        cause: SymbolFailure,
    },

    #[error("deferred merge of {rows} rows into {sink} failed: {source}")]
    DeferredMerge {
        report: Box<SyncReport>,
        sink: &'static str,
        rows: usize,
        source: SinkError,
    },

    #[error("freshness lookup failed: {0}")]
    Freshness(#[source] SinkError),
}

impl SyncError {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::SymbolsFailed { report, .. } | Self::DeferredMerge { report, .. } => {
                Some(report.as_ref())
            }
            Self::Freshness(_) => None,
        }
    }
}

/// Runs incremental and backfill price syncs against one source and one sink.
#[derive(Clone)]
pub struct SyncEngine {
    source: Arc<dyn StockSource>,
    sink: Arc<dyn Sink>,
    tracker: FreshnessTracker,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn StockSource>, sink: Arc<dyn Sink>) -> Self {
        Self {
            tracker: FreshnessTracker::new(Arc::clone(&sink)),
            source,
            sink,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn today(&self) -> Date {
        today_at(self.clock.now(), self.config.source_offset)
    }

    /// Incremental sync of `symbols`. Duplicate symbols are synced once.
    pub async fn sync(&self, symbols: &[Symbol], params: SyncParams) -> Result<SyncReport, SyncError> {
        let started_at = UtcDateTime::from_any_offset(self.clock.now());
        let mut queue = symbols.to_vec();
        queue.sort();
        queue.dedup();

        let freshness = self
            .tracker
            .refresh(queue.clone())
            .await
            .map_err(SyncError::Freshness)?;
        let today = self.today();
        let strategy = self.sink.merge_strategy();
        let workers = params.concurrency.clamp(1, queue.len().max(1));

        info!(
            source = self.source.id(),
            sink = self.sink.name(),
            symbols = queue.len(),
            workers,
            lookback_days = params.lookback_days,
            freshness_days = params.freshness_days,
            %today,
            "starting price sync"
        );

        let context = Arc::new(WorkerContext {
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            freshness,
            today,
            params,
            dedup: self.config.dedup,
            strategy,
        });

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        for symbol in &queue {
            // The receiver is alive until the workers below drain it.
            let _ = work_tx.send(symbol.clone());
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(run_worker(
                worker,
                Arc::clone(&context),
                Arc::clone(&work_rx),
                result_tx.clone(),
            ));
        }
        drop(result_tx);

        let mut collector = Collector::default();
        while let Some(result) = result_rx.recv().await {
            collector.record(result);
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(error) = joined {
                error!(%error, "sync worker exited abnormally");
            }
        }
        collector.fill_missing(&queue);

        let mut deferred_failure = None;
        if strategy == MergeStrategy::Deferred && !collector.deferred.is_empty() {
            let Deduplicated { records, .. } = self.config.dedup.apply(std::mem::take(&mut collector.deferred));
            let rows = records.len();
            match run_blocking(Arc::clone(&self.sink), move |sink| sink.upsert_prices(&records)).await {
                Ok(written) => {
                    info!(sink = self.sink.name(), rows, written, "deferred merge committed");
                    collector.commit_deferred();
                }
                Err(error) => {
                    error!(sink = self.sink.name(), rows, %error, "deferred merge failed");
                    deferred_failure = Some((rows, error));
                }
            }
        }

        let (report, first_failure) = collector.into_report(ReportHeader {
            source: self.source.id(),
            sink: self.sink.name(),
            merge_strategy: strategy,
            dedup: self.config.dedup,
            params,
            today,
            started_at,
            finished_at: UtcDateTime::from_any_offset(self.clock.now()),
        });

        info!(
            synced = report.synced,
            current = report.current,
            unknown = report.unknown,
            failed = report.failed,
            rows_written = report.rows_written,
            "price sync finished"
        );

        if let Some((rows, source)) = deferred_failure {
            return Err(SyncError::DeferredMerge {
                sink: self.sink.name(),
                report: Box::new(report),
                rows,
                source,
            });
        }

        match first_failure {
            Some((symbol, cause)) => Err(SyncError::SymbolsFailed {
                failed: report.failed,
                total: report.symbols,
                report: Box::new(report),
                symbol,
                cause,
            }),
            None => Ok(report),
        }
    }

    /// Full-history sync: same scheduling as [`sync`](Self::sync) with the backfill lookback.
    pub async fn backfill(&self, symbols: &[Symbol], params: SyncParams) -> Result<SyncReport, SyncError> {
        self.sync(symbols, params.into_backfill()).await
    }
}

struct WorkerContext {
    source: Arc<dyn StockSource>,
    sink: Arc<dyn Sink>,
    freshness: FreshnessMap,
    today: Date,
    params: SyncParams,
    dedup: DedupPolicy,
    strategy: MergeStrategy,
}

struct SymbolResult {
    outcome: SymbolOutcome,
    failure: Option<SymbolFailure>,
    deferred: Vec<PriceRecord>,
}

impl SymbolResult {
    fn new(symbol: Symbol, status: SymbolStatus) -> Self {
        Self {
            outcome: SymbolOutcome { symbol, status },
            failure: None,
            deferred: Vec::new(),
        }
    }

    fn failed(symbol: Symbol, stage: FailureStage, failure: SymbolFailure) -> Self {
        let status = SymbolStatus::Failed {
            stage,
            reason: failure.to_string(),
        };
        Self {
            failure: Some(failure),
            ..Self::new(symbol, status)
        }
    }
}

async fn run_worker(
    worker: usize,
    context: Arc<WorkerContext>,
    queue: Arc<Mutex<UnboundedReceiver<Symbol>>>,
    results: UnboundedSender<SymbolResult>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(symbol) = next else {
            break;
        };

        let task = tokio::spawn(process_symbol(Arc::clone(&context), symbol.clone()));
        let result = match task.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(worker, %symbol, error = %join_error, "symbol task aborted");
                SymbolResult::failed(
                    symbol,
                    FailureStage::Worker,
                    SymbolFailure::Worker(join_error.to_string()),
                )
            }
        };

        if results.send(result).is_err() {
            break;
        }
    }
    debug!(worker, "sync worker drained");
}

async fn process_symbol(context: Arc<WorkerContext>, symbol: Symbol) -> SymbolResult {
    let latest = context.freshness.get(&symbol);
    let plan = plan_window(
        latest,
        context.today,
        context.params.lookback_days,
        context.params.freshness_days,
    );
    let window = match plan {
        FetchPlan::Current => {
            debug!(%symbol, ?latest, "symbol is current; skipping fetch");
            return SymbolResult::new(symbol, SymbolStatus::Current);
        }
        FetchPlan::Fetch(window) => window,
    };

    let request = match PriceRequest::new(symbol.clone(), Some(window.start), Some(window.end)) {
        Ok(request) => request,
        Err(error) => {
            return SymbolResult::failed(symbol, FailureStage::Fetch, SymbolFailure::Fetch(error))
        }
    };

    let rows = match context.source.fetch_prices(request).await {
        Ok(rows) => rows,
        Err(error) if error.is_unknown_symbol() => {
            warn!(%symbol, %error, "source does not list symbol; skipping");
            return SymbolResult::new(
                symbol,
                SymbolStatus::Unknown {
                    reason: error.to_string(),
                },
            );
        }
        Err(error) => {
            error!(%symbol, start = %window.start, end = %window.end, %error, "price fetch failed");
            return SymbolResult::failed(symbol, FailureStage::Fetch, SymbolFailure::Fetch(error));
        }
    };

    let fetched = rows.len();
    let Deduplicated { records, dropped } = context.dedup.apply(rows);
    if dropped > 0 {
        debug!(%symbol, dropped, "collapsed duplicate price rows");
    }
    let synced = |written| SymbolStatus::Synced {
        window,
        fetched,
        written,
        duplicates_dropped: dropped,
    };

    if context.strategy == MergeStrategy::Deferred {
        return SymbolResult {
            deferred: records,
            ..SymbolResult::new(symbol, synced(0))
        };
    }
    if records.is_empty() {
        debug!(%symbol, "source returned no rows for window");
        return SymbolResult::new(symbol, synced(0));
    }

    match run_blocking(Arc::clone(&context.sink), move |sink| sink.upsert_prices(&records)).await {
        Ok(written) => {
            info!(%symbol, start = %window.start, end = %window.end, fetched, written, "merged prices");
            SymbolResult::new(symbol, synced(written))
        }
        Err(error) => {
            error!(%symbol, %error, "price merge failed");
            SymbolResult::failed(symbol, FailureStage::Merge, SymbolFailure::Merge(error))
        }
    }
}

struct ReportHeader {
    source: &'static str,
    sink: &'static str,
    merge_strategy: MergeStrategy,
    dedup: DedupPolicy,
    params: SyncParams,
    today: Date,
    started_at: UtcDateTime,
    finished_at: UtcDateTime,
}

#[derive(Default)]
struct Collector {
    outcomes: BTreeMap<Symbol, SymbolStatus>,
    first_failure: Option<(Symbol, SymbolFailure)>,
    deferred: Vec<PriceRecord>,
    deferred_counts: BTreeMap<Symbol, usize>,
}

impl Collector {
    fn record(&mut self, result: SymbolResult) {
        let SymbolResult {
            outcome,
            failure,
            deferred,
        } = result;

        if let Some(failure) = failure {
            if self.first_failure.is_none() {
                self.first_failure = Some((outcome.symbol.clone(), failure));
            }
        }
        if !deferred.is_empty() {
            self.deferred_counts
                .insert(outcome.symbol.clone(), deferred.len());
            self.deferred.extend(deferred);
        }
        self.outcomes.insert(outcome.symbol, outcome.status);
    }

    /// Any queued symbol without an outcome is recorded as a worker failure.
    fn fill_missing(&mut self, queue: &[Symbol]) {
        for symbol in queue {
            if !self.outcomes.contains_key(symbol) {
                self.record(SymbolResult::failed(
                    symbol.clone(),
                    FailureStage::Worker,
                    SymbolFailure::Worker(String::from("symbol produced no outcome")),
                ));
            }
        }
    }

    fn commit_deferred(&mut self) {
        for (symbol, count) in &self.deferred_counts {
            if let Some(SymbolStatus::Synced { written, .. }) = self.outcomes.get_mut(symbol) {
                *written = *count;
            }
        }
    }

    fn into_report(self, header: ReportHeader) -> (SyncReport, Option<(Symbol, SymbolFailure)>) {
        let mut report = SyncReport {
            source: header.source,
            sink: header.sink,
            merge_strategy: header.merge_strategy,
            dedup: header.dedup,
            params: header.params,
            today: header.today,
            started_at: header.started_at,
            finished_at: header.finished_at,
            symbols: self.outcomes.len(),
            synced: 0,
            current: 0,
            unknown: 0,
            failed: 0,
            rows_fetched: 0,
            rows_written: 0,
            duplicates_dropped: 0,
            outcomes: Vec::with_capacity(self.outcomes.len()),
        };

        for (symbol, status) in self.outcomes {
            match &status {
                SymbolStatus::Current => report.current += 1,
                SymbolStatus::Synced {
                    fetched,
                    written,
                    duplicates_dropped,
                    ..
                } => {
                    report.synced += 1;
                    report.rows_fetched += fetched;
                    report.rows_written += written;
                    report.duplicates_dropped += duplicates_dropped;
                }
                SymbolStatus::Unknown { .. } => report.unknown += 1,
                SymbolStatus::Failed { .. } => report.failed += 1,
            }
            report.outcomes.push(SymbolOutcome { symbol, status });
        }

        (report, self.first_failure)
    }
}
