//! Incremental views: windowed counts, regrouping by industry, ranked sets and top-N.

use ta_core::{CoreError, Window};

pub mod count;
pub mod dataflow;
pub mod rank;
pub mod regroup;
pub mod store;
pub mod topn;

pub use count::WindowedCountStore;
pub use rank::{BoundedRankAggregator, RankedSet};
pub use regroup::{RankUpdate, Regrouped, Regrouper};
pub use store::{InMemoryWindowStore, WindowStore};
pub use topn::{TopN, TopNFormatter};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ViewError {
    #[error("window {window} closed at stream time {stream_time_ms}ms")]
    WindowClosed { window: Window, stream_time_ms: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ViewError {
    /// Store failures are transient; everything else is a property of the event itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ViewError::Store(_))
    }
}
