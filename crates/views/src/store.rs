use std::collections::BTreeSet;

use dashmap::DashMap;
use ta_core::{ArticleKey, Window, WindowedKey};

use crate::StoreError;

pub type CountKey = WindowedKey<ArticleKey>;

/// Keyed window store holding one count per windowed article.
///
/// Implementations must tolerate concurrent calls for different keys. Read-modify-write
/// atomicity for a single key is provided by the caller.
pub trait WindowStore: Send + Sync {
    fn get(&self, key: &CountKey) -> Result<Option<u64>, StoreError>;
    fn put(&self, key: CountKey, count: u64) -> Result<(), StoreError>;
    fn delete(&self, key: &CountKey) -> Result<Option<u64>, StoreError>;
    /// All entries of one window, ordered by article key.
    fn range_by_window(&self, window: &Window) -> Result<Vec<(ArticleKey, u64)>, StoreError>;
    fn windows(&self) -> Result<Vec<Window>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    counts: DashMap<CountKey, u64>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn get(&self, key: &CountKey) -> Result<Option<u64>, StoreError> {
        Ok(self.counts.get(key).map(|count| *count))
    }

    fn put(&self, key: CountKey, count: u64) -> Result<(), StoreError> {
        self.counts.insert(key, count);
        Ok(())
    }

    fn delete(&self, key: &CountKey) -> Result<Option<u64>, StoreError> {
        Ok(self.counts.remove(key).map(|(_, count)| count))
    }

    fn range_by_window(&self, window: &Window) -> Result<Vec<(ArticleKey, u64)>, StoreError> {
        let mut entries: Vec<(ArticleKey, u64)> = self
            .counts
            .iter()
            .filter(|entry| entry.key().window == *window)
            .map(|entry| (entry.key().key.clone(), *entry.value()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn windows(&self) -> Result<Vec<Window>, StoreError> {
        let windows: BTreeSet<Window> = self.counts.iter().map(|entry| entry.key().window).collect();
        Ok(windows.into_iter().collect())
    }
}
