use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    events_received: AtomicU64,
    events_filtered: AtomicU64,
    malformed_dropped: AtomicU64,
    late_dropped: AtomicU64,
    counts_updated: AtomicU64,
    rank_updates: AtomicU64,
    results_emitted: AtomicU64,
    store_retries: AtomicU64,
    windows_retired: AtomicU64,
    rank_sets_peak: AtomicU64,
}

impl MetricsRegistry {
    pub fn inc_events_received(&self, delta: u64) {
        self.inner.events_received.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_events_filtered(&self, delta: u64) {
        self.inner.events_filtered.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_malformed_dropped(&self, delta: u64) {
        self.inner.malformed_dropped.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_late_dropped(&self, delta: u64) {
        self.inner.late_dropped.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_counts_updated(&self, delta: u64) {
        self.inner.counts_updated.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_rank_updates(&self, delta: u64) {
        self.inner.rank_updates.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_results_emitted(&self, delta: u64) {
        self.inner.results_emitted.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_store_retries(&self, delta: u64) {
        self.inner.store_retries.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_windows_retired(&self, delta: u64) {
        self.inner.windows_retired.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn record_rank_sets(&self, active: u64) {
        self.inner.rank_sets_peak.fetch_max(active, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.inner.events_received.load(Ordering::Relaxed),
            events_filtered: self.inner.events_filtered.load(Ordering::Relaxed),
            malformed_dropped: self.inner.malformed_dropped.load(Ordering::Relaxed),
            late_dropped: self.inner.late_dropped.load(Ordering::Relaxed),
            counts_updated: self.inner.counts_updated.load(Ordering::Relaxed),
            rank_updates: self.inner.rank_updates.load(Ordering::Relaxed),
            results_emitted: self.inner.results_emitted.load(Ordering::Relaxed),
            store_retries: self.inner.store_retries.load(Ordering::Relaxed),
            windows_retired: self.inner.windows_retired.load(Ordering::Relaxed),
            rank_sets_peak: self.inner.rank_sets_peak.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_filtered: u64,
    pub malformed_dropped: u64,
    pub late_dropped: u64,
    pub counts_updated: u64,
    pub rank_updates: u64,
    pub results_emitted: u64,
    pub store_retries: u64,
    pub windows_retired: u64,
    pub rank_sets_peak: u64,
}

impl MetricsSnapshot {
    pub fn to_json_line(&self, label: &str, elapsed: Option<Duration>) -> String {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            label: &'a str,
            #[serde(flatten)]
            metrics: &'a MetricsSnapshot,
            elapsed_ms: Option<u128>,
        }

        let payload = Snapshot {
            label,
            metrics: self,
            elapsed_ms: elapsed.map(|d| d.as_millis()),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| String::from("{}"))
    }
}

pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
