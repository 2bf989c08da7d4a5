use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use ta_core::{ArticleKey, ArticleView, Change, TumblingWindows, Window, WindowedKey};
use tracing::debug;

use crate::store::{CountKey, InMemoryWindowStore, WindowStore};
use crate::ViewError;

pub type CountChange = Change<CountKey, u64>;

/// Windowed view counter over an opaque [`WindowStore`].
///
/// Each increment is a read-modify-write under the lock of the key's shard, so concurrent
/// increments of one key never lose updates while different shards proceed in parallel.
///
/// Stream time is the largest timestamp observed so far. A window is closed once
/// `window.end_ms + retention_ms <= stream_time`; closed windows reject increments.
pub struct WindowedCountStore<S = InMemoryWindowStore> {
    store: S,
    windows: TumblingWindows,
    retention_ms: u64,
    stream_time_ms: AtomicU64,
    locks: Vec<Mutex<()>>,
    hasher: RandomState,
}

impl WindowedCountStore<InMemoryWindowStore> {
    pub fn in_memory(windows: TumblingWindows, retention_ms: u64, shards: usize) -> Self {
        Self::new(InMemoryWindowStore::new(), windows, retention_ms, shards)
    }
}

impl<S: WindowStore> WindowedCountStore<S> {
    pub fn new(store: S, windows: TumblingWindows, retention_ms: u64, shards: usize) -> Self {
        Self {
            store,
            windows,
            retention_ms,
            stream_time_ms: AtomicU64::new(0),
            locks: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn windows(&self) -> TumblingWindows {
        self.windows
    }

    pub fn stream_time_ms(&self) -> u64 {
        self.stream_time_ms.load(Ordering::Acquire)
    }

    /// Advances stream time; never moves it backwards.
    pub fn observe(&self, ts_ms: u64) {
        self.stream_time_ms.fetch_max(ts_ms, Ordering::AcqRel);
    }

    pub fn is_closed(&self, window: &Window) -> bool {
        window.end_ms.saturating_add(self.retention_ms) <= self.stream_time_ms()
    }

    /// Observes the view's timestamp, assigns its window and counts it.
    pub fn count_view(&self, view: &ArticleView) -> Result<CountChange, ViewError> {
        self.observe(view.ts_ms);
        let key = WindowedKey::new(self.windows.assign(view.ts_ms), view.key.clone());
        self.increment(&key)
    }

    pub fn increment(&self, key: &CountKey) -> Result<CountChange, ViewError> {
        let _guard = self.lock_for(key);
        if self.is_closed(&key.window) {
            debug!(window = %key.window, page = %key.key.page, "rejecting increment for closed window");
            return Err(ViewError::WindowClosed {
                window: key.window,
                stream_time_ms: self.stream_time_ms(),
            });
        }
        let old = self.store.get(key)?;
        let new = old.unwrap_or(0) + 1;
        self.store.put(key.clone(), new)?;
        Ok(Change { key: key.clone(), old, new })
    }

    pub fn get(&self, key: &CountKey) -> Result<Option<u64>, ViewError> {
        Ok(self.store.get(key)?)
    }

    pub fn range_by_window(&self, window: &Window) -> Result<Vec<(ArticleKey, u64)>, ViewError> {
        Ok(self.store.range_by_window(window)?)
    }

    /// Windows that still hold entries but can no longer accept increments.
    pub fn closed_windows(&self) -> Result<Vec<Window>, ViewError> {
        let mut windows = self.store.windows()?;
        windows.retain(|window| self.is_closed(window));
        Ok(windows)
    }

    /// Deletes every entry of `window` and returns how many were removed. Safe to repeat
    /// after a partial failure.
    pub fn retire_window(&self, window: &Window) -> Result<usize, ViewError> {
        let entries = self.store.range_by_window(window)?;
        for (article, _) in &entries {
            let key = WindowedKey::new(*window, article.clone());
            let _guard = self.lock_for(&key);
            self.store.delete(&key)?;
        }
        debug!(%window, entries = entries.len(), "retired window");
        Ok(entries.len())
    }

    fn lock_for(&self, key: &CountKey) -> std::sync::MutexGuard<'_, ()> {
        let shard = (self.hasher.hash_one(key) % self.locks.len() as u64) as usize;
        self.locks[shard].lock().unwrap_or_else(PoisonError::into_inner)
    }
}
