use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::Infallible;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ta_core::{RankRecord, Window, WindowedKey};
use tracing::debug;

use crate::regroup::{RankUpdate, Regrouped};

/// Position of a record in rank order: count descending, then page ascending.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    count: Reverse<u64>,
    page: String,
}

impl RankKey {
    fn of(page: &str, count: u64) -> Self {
        Self { count: Reverse(count), page: page.to_string() }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    record: RankRecord,
    copies: usize,
}

/// Ordered multiset of rank records with removal by page.
///
/// `entries` keeps the rank order; `by_page` remembers the counts each page is currently
/// present with (oldest first), so a retraction can find its entry without knowing the
/// count. Both `add` and `remove` are logarithmic in the set size. The set is never
/// capped: bounding happens when reading the top entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<RankRecord>", into = "Vec<RankRecord>")]
pub struct RankedSet {
    entries: BTreeMap<RankKey, Slot>,
    by_page: HashMap<String, VecDeque<u64>>,
    len: usize,
}

impl RankedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn add(&mut self, record: RankRecord) {
        self.by_page
            .entry(record.page.clone())
            .or_default()
            .push_back(record.count);
        self.entries
            .entry(RankKey::of(&record.page, record.count))
            .and_modify(|slot| slot.copies += 1)
            .or_insert(Slot { record, copies: 1 });
        self.len += 1;
    }

    /// Removes the oldest record still present for `record.page`, whatever its count.
    /// Returns `false` when the page is not present.
    pub fn remove(&mut self, record: &RankRecord) -> bool {
        let Some(counts) = self.by_page.get_mut(&record.page) else {
            return false;
        };
        let Some(count) = counts.pop_front() else {
            return false;
        };
        if counts.is_empty() {
            self.by_page.remove(&record.page);
        }

        let key = RankKey::of(&record.page, count);
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.copies -= 1;
            if slot.copies == 0 {
                self.entries.remove(&key);
            }
        }
        self.len -= 1;
        true
    }

    pub fn apply(&mut self, update: &RankUpdate) -> bool {
        match update {
            RankUpdate::Retract(record) => self.remove(record),
            RankUpdate::Add(record) => {
                self.add(record.clone());
                true
            }
        }
    }

    /// Records in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &RankRecord> {
        self.entries
            .values()
            .flat_map(|slot| std::iter::repeat(&slot.record).take(slot.copies))
    }

    /// The first `n` records in rank order. Does not modify the set.
    pub fn top(&self, n: usize) -> impl Iterator<Item = &RankRecord> {
        self.iter().take(n)
    }

    pub fn snapshot(&self) -> Vec<RankRecord> {
        self.iter().cloned().collect()
    }
}

impl From<Vec<RankRecord>> for RankedSet {
    fn from(records: Vec<RankRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.add(record);
        }
        set
    }
}

impl From<RankedSet> for Vec<RankRecord> {
    fn from(set: RankedSet) -> Self {
        set.snapshot()
    }
}

/// One [`RankedSet`] per `(window, industry)` key.
///
/// Sets live in a sharded concurrent map: updates to different keys do not contend, and
/// all updates of one [`apply`](Self::apply) call that share a key run under that key's
/// entry lock, so readers never observe a retraction without its matching addition.
#[derive(Debug, Default)]
pub struct BoundedRankAggregator {
    sets: DashMap<WindowedKey<String>, RankedSet>,
}

impl BoundedRankAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &WindowedKey<String>, record: RankRecord) {
        self.sets.entry(key.clone()).or_default().add(record);
    }

    pub fn remove(&self, key: &WindowedKey<String>, record: &RankRecord) -> bool {
        let removed = self
            .sets
            .get_mut(key)
            .map(|mut set| set.remove(record))
            .unwrap_or(false);
        if !removed {
            debug!(industry = %key.key, page = %record.page, "retraction had nothing to remove");
        }
        self.sets.remove_if(key, |_, set| set.is_empty());
        removed
    }

    /// Applies regrouped updates in order and returns the keys they touched.
    pub fn apply(&self, updates: &[Regrouped]) -> Vec<WindowedKey<String>> {
        match self.apply_with(updates, |_, _| Ok::<_, Infallible>(())) {
            Ok(touched) => touched,
            Err(never) => match never {},
        }
    }

    /// Applies regrouped updates in order. After each run of updates sharing a key,
    /// `on_changed` sees the resulting set while the key's entry lock is still held, so
    /// whatever it publishes for a key is published in the order the key changed.
    pub fn apply_with<E>(
        &self,
        updates: &[Regrouped],
        mut on_changed: impl FnMut(&WindowedKey<String>, &RankedSet) -> Result<(), E>,
    ) -> Result<Vec<WindowedKey<String>>, E> {
        let mut touched = Vec::new();
        let mut rest = updates;
        while let Some(first) = rest.first() {
            let run = rest.iter().take_while(|u| u.key == first.key).count();
            let (batch, tail) = rest.split_at(run);
            rest = tail;

            let published = {
                let mut set = self.sets.entry(first.key.clone()).or_default();
                for regrouped in batch {
                    if !set.apply(&regrouped.update) {
                        debug!(industry = %first.key.key, ?regrouped.update, "retraction had nothing to remove");
                    }
                }
                on_changed(&first.key, set.value())
            };
            self.sets.remove_if(&first.key, |_, set| set.is_empty());
            published?;
            touched.push(first.key.clone());
        }
        Ok(touched)
    }

    /// Pages of the `n` highest-ranked records for `key`, highest first.
    pub fn top_n(&self, key: &WindowedKey<String>, n: usize) -> Vec<String> {
        self.sets
            .get(key)
            .map(|set| set.top(n).map(|record| record.page.clone()).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, key: &WindowedKey<String>) -> Vec<RankRecord> {
        self.sets.get(key).map(|set| set.snapshot()).unwrap_or_default()
    }

    /// Runs `f` against the set for `key` while holding its read lock.
    pub fn with_set<R>(&self, key: &WindowedKey<String>, f: impl FnOnce(Option<&RankedSet>) -> R) -> R {
        match self.sets.get(key) {
            Some(set) => f(Some(set.value())),
            None => f(None),
        }
    }

    /// Drops every set belonging to `window` and returns how many were dropped.
    pub fn retire_window(&self, window: &Window) -> usize {
        let before = self.sets.len();
        self.sets.retain(|key, _| key.window != *window);
        before - self.sets.len()
    }

    pub fn keys(&self) -> Vec<WindowedKey<String>> {
        let mut keys: Vec<_> = self.sets.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
