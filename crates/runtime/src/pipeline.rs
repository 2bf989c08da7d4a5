//! Event-at-a-time driver: validate, filter, count, regroup, rank, emit.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use tracing::{debug, error, info, warn};

use ta_core::{ArticleFilter, CoreError, PageView, ScopeFilter, TopArticlesConfig, Window, WindowedKey};
use ta_views::{
    BoundedRankAggregator, InMemoryWindowStore, Regrouper, StoreError, TopN, TopNFormatter, ViewError,
    WindowStore, WindowedCountStore,
};

use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::sink::Sink;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("store unavailable after {attempts} attempts: {source}")]
    StoreUnavailable { attempts: u32, source: StoreError },
    #[error("sink failed: {0}")]
    Sink(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    View(ViewError),
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

/// What happened to one event.
#[derive(Debug)]
pub enum Outcome {
    /// Counted; carries the refreshed top-N of every ranking it changed.
    Ranked(Vec<TopN>),
    Filtered,
    Malformed(CoreError),
    Late { window: Window },
}

/// Stops intake; events already admitted still run to completion.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

pub struct Pipeline<S = InMemoryWindowStore> {
    cfg: TopArticlesConfig,
    filter: Box<dyn ScopeFilter>,
    counts: WindowedCountStore<S>,
    ranks: BoundedRankAggregator,
    formatter: TopNFormatter,
    metrics: MetricsRegistry,
    stop: StopHandle,
    /// Start of the newest window seen when expired windows were last retired.
    retired_through_ms: AtomicU64,
}

impl Pipeline<InMemoryWindowStore> {
    pub fn in_memory(cfg: TopArticlesConfig) -> Result<Self, PipelineError> {
        Self::with_store(cfg, InMemoryWindowStore::new())
    }
}

impl<S: WindowStore> Pipeline<S> {
    pub fn with_store(cfg: TopArticlesConfig, store: S) -> Result<Self, PipelineError> {
        cfg.validate()?;
        let counts = WindowedCountStore::new(store, cfg.windows()?, cfg.retention_ms, cfg.shards);
        Ok(Self {
            formatter: TopNFormatter::new(cfg.top_n),
            cfg,
            filter: Box::new(ArticleFilter),
            counts,
            ranks: BoundedRankAggregator::new(),
            metrics: MetricsRegistry::default(),
            stop: StopHandle::default(),
            retired_through_ms: AtomicU64::new(0),
        })
    }

    pub fn with_filter(mut self, filter: impl ScopeFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn counts(&self) -> &WindowedCountStore<S> {
        &self.counts
    }

    pub fn ranks(&self) -> &BoundedRankAggregator {
        &self.ranks
    }

    pub fn top_n(&self, key: &WindowedKey<String>) -> TopN {
        self.formatter.top_n(&self.ranks, key)
    }

    /// Runs one event through the whole chain.
    ///
    /// Events of the same `(industry, window)` must not be processed concurrently; the
    /// drivers below guarantee that by routing each such pair to a single worker. The
    /// sink is called while the ranking's key is locked and must not read the rankings.
    pub fn process(&self, event: &PageView, sink: &dyn Sink) -> Result<Outcome, PipelineError> {
        self.metrics.inc_events_received(1);

        let view = match event.validate() {
            Ok(view) => view,
            Err(err) => {
                debug!(%err, page = ?event.page, "dropping malformed event");
                self.metrics.inc_malformed_dropped(1);
                return Ok(Outcome::Malformed(err));
            }
        };
        if !self.filter.is_in_scope(event) {
            self.metrics.inc_events_filtered(1);
            return Ok(Outcome::Filtered);
        }

        let change = match self.with_store_retry("count", || self.counts.count_view(&view)) {
            Ok(change) => change,
            Err(ViewError::WindowClosed { window, .. }) => {
                debug!(%window, page = %view.key.page, ts_ms = view.ts_ms, "dropping late event");
                self.metrics.inc_late_dropped(1);
                return Ok(Outcome::Late { window });
            }
            Err(err) => return Err(self.fatal(err)),
        };
        self.metrics.inc_counts_updated(1);

        let updates = Regrouper::regroup(&change);
        self.metrics.inc_rank_updates(updates.len() as u64);

        // Each ranking is formatted and emitted while its key is still locked, so the sink
        // sees the rankings of one key in the order they were produced.
        let mut results = Vec::with_capacity(updates.len());
        self.ranks.apply_with(&updates, |key, set| {
            let result = self.formatter.format(key, Some(set));
            sink.emit(&result)?;
            self.metrics.inc_results_emitted(1);
            results.push(result);
            Ok::<_, std::io::Error>(())
        })?;
        self.metrics.record_rank_sets(self.ranks.len() as u64);

        self.maybe_retire()?;
        Ok(Outcome::Ranked(results))
    }

    /// Runs one store step, redoing it on store failures up to `max_store_retries` times.
    /// Exhaustion trips the stop handle. Steps must be safe to repeat after a failure.
    fn with_store_retry<T>(
        &self,
        step: &'static str,
        mut op: impl FnMut() -> Result<T, ViewError>,
    ) -> Result<T, ViewError> {
        let max_attempts = self.cfg.max_store_retries + 1;
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(%err, attempt, step, "store failed, retrying");
                    self.metrics.inc_store_retries(1);
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    error!(%err, attempts = attempt, step, "store unavailable, halting");
                    self.stop.stop();
                    return Err(err);
                }
                other => return other,
            }
        }
    }

    fn fatal(&self, err: ViewError) -> PipelineError {
        match err {
            ViewError::Store(source) => PipelineError::StoreUnavailable {
                attempts: self.cfg.max_store_retries + 1,
                source,
            },
            ViewError::Core(err) => PipelineError::Core(err),
            other => PipelineError::View(other),
        }
    }

    /// Retires closed windows once stream time has entered a new window.
    fn maybe_retire(&self) -> Result<(), PipelineError> {
        let current = self.counts.windows().assign(self.counts.stream_time_ms()).start_ms;
        if self.retired_through_ms.fetch_max(current, Ordering::AcqRel) >= current {
            return Ok(());
        }
        self.retire_expired()?;
        Ok(())
    }

    /// Drops every closed window from the count store and the rankings. Store steps are
    /// retried like counting; a window's rankings go only after its counts are gone.
    pub fn retire_expired(&self) -> Result<Vec<Window>, PipelineError> {
        let closed = self
            .with_store_retry("list closed windows", || self.counts.closed_windows())
            .map_err(|err| self.fatal(err))?;
        for window in &closed {
            let entries = self
                .with_store_retry("retire window", || self.counts.retire_window(window))
                .map_err(|err| self.fatal(err))?;
            let rank_sets = self.ranks.retire_window(window);
            self.metrics.inc_windows_retired(1);
            info!(%window, entries, rank_sets, "window retired");
        }
        Ok(closed)
    }

    /// Processes events in arrival order on the calling thread until the input ends or
    /// the stop handle fires.
    pub fn run<I>(&self, events: I, sink: &dyn Sink) -> Result<MetricsSnapshot, PipelineError>
    where
        I: IntoIterator<Item = PageView>,
    {
        for event in events {
            if self.stop.is_stopped() {
                info!("stop requested, halting intake");
                break;
            }
            if let Err(err) = self.process(&event, sink) {
                self.stop.stop();
                return Err(err);
            }
        }
        Ok(self.metrics.snapshot())
    }

    /// Processes events on `cfg.workers` threads.
    ///
    /// Events are routed by `(industry, window)`, so every update of one ranking is
    /// applied and emitted by a single worker in arrival order; different rankings
    /// proceed concurrently. Events without a usable timestamp are routed by industry
    /// alone and dropped as malformed by their worker.
    ///
    /// Each worker has a bounded queue. Once the stop handle fires, intake halts; events
    /// already queued count as admitted and are still processed. A worker error trips
    /// the stop handle and the first error is returned after all workers have drained.
    pub fn run_partitioned<I>(&self, events: I, sink: &dyn Sink) -> Result<MetricsSnapshot, PipelineError>
    where
        I: IntoIterator<Item = PageView>,
    {
        let workers = self.cfg.workers;
        if workers <= 1 {
            return self.run(events, sink);
        }

        let router = RandomState::new();
        let windows = self.counts.windows();
        std::thread::scope(|scope| {
            let mut senders = Vec::with_capacity(workers);
            let mut handles = Vec::with_capacity(workers);
            for index in 0..workers {
                let (tx, rx) = mpsc::sync_channel::<PageView>(1024);
                senders.push(tx);
                handles.push(scope.spawn(move || -> Result<(), PipelineError> {
                    debug!(worker = index, "partition worker started");
                    for event in rx {
                        if let Err(err) = self.process(&event, sink) {
                            self.stop.stop();
                            return Err(err);
                        }
                    }
                    Ok(())
                }));
            }

            for event in events {
                if self.stop.is_stopped() {
                    info!("stop requested, halting intake");
                    break;
                }
                let window = event
                    .ts_ms
                    .and_then(|ts| u64::try_from(ts).ok())
                    .map(|ts| windows.assign(ts).start_ms);
                let partition = (router.hash_one((&event.industry, window)) % workers as u64) as usize;
                if senders[partition].send(event).is_err() {
                    // the worker exited on a fatal error; its result is reported below
                    break;
                }
            }
            drop(senders);

            let mut first_err = None;
            for (index, handle) in handles.into_iter().enumerate() {
                let result = handle.join().unwrap_or(Err(PipelineError::WorkerPanicked(index)));
                if let Err(err) = result {
                    self.stop.stop();
                    first_err.get_or_insert(err);
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(self.metrics.snapshot()),
            }
        })
    }
}
