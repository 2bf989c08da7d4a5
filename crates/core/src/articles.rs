use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Raw page-view record as delivered by the producer. Every field may be absent on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageView {
    pub page: Option<String>,
    pub industry: Option<String>,
    pub flags: Option<String>,
    pub ts_ms: Option<i64>,
}

impl PageView {
    pub fn new(page: &str, industry: &str, flags: &str, ts_ms: i64) -> Self {
        Self {
            page: Some(page.to_string()),
            industry: Some(industry.to_string()),
            flags: Some(flags.to_string()),
            ts_ms: Some(ts_ms),
        }
    }

    /// Checks that the fields needed downstream are present and the timestamp is usable.
    pub fn validate(&self) -> Result<ArticleView, CoreError> {
        let page = self.page.clone().ok_or(CoreError::MissingField("page"))?;
        let industry = self.industry.clone().ok_or(CoreError::MissingField("industry"))?;
        if self.flags.is_none() {
            return Err(CoreError::MissingField("flags"));
        }
        let ts = self.ts_ms.ok_or(CoreError::MissingField("ts_ms"))?;
        let ts_ms = u64::try_from(ts).map_err(|_| CoreError::NegativeTimestamp(ts))?;
        Ok(ArticleView {
            key: ArticleKey { page, industry },
            ts_ms,
        })
    }
}

/// Counting key: a page together with the industry it was published under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleKey {
    pub page: String,
    pub industry: String,
}

impl ArticleKey {
    pub fn new(page: &str, industry: &str) -> Self {
        Self { page: page.to_string(), industry: industry.to_string() }
    }
}

/// A validated page view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleView {
    pub key: ArticleKey,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RankRecord {
    pub page: String,
    pub industry: String,
    pub count: u64,
}

impl RankRecord {
    pub fn new(page: &str, industry: &str, count: u64) -> Self {
        Self { page: page.to_string(), industry: industry.to_string(), count }
    }

    /// Rank order: higher count first, then page ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .count
            .cmp(&self.count)
            .then_with(|| self.page.cmp(&other.page))
    }
}

/// Decides which page views take part in the ranking.
pub trait ScopeFilter: Send + Sync {
    fn is_in_scope(&self, view: &PageView) -> bool;
}

impl<F> ScopeFilter for F
where
    F: Fn(&PageView) -> bool + Send + Sync,
{
    fn is_in_scope(&self, view: &PageView) -> bool {
        self(view)
    }
}

/// Keeps article pages: views whose flags carry the `ART` marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArticleFilter;

impl ArticleFilter {
    pub const MARKER: &'static str = "ART";
}

impl ScopeFilter for ArticleFilter {
    fn is_in_scope(&self, view: &PageView) -> bool {
        view.flags
            .as_deref()
            .is_some_and(|flags| flags.contains(Self::MARKER))
    }
}
