use serde::{Deserialize, Serialize};
use ta_core::{TopArticlesConfig, WindowedKey};

use crate::rank::{BoundedRankAggregator, RankedSet};

/// Highest-ranked pages of one `(window, industry)` key, highest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopN {
    pub key: WindowedKey<String>,
    pub pages: Vec<String>,
}

impl TopN {
    /// One page per line, each line newline-terminated.
    pub fn render(&self) -> String {
        self.pages.iter().fold(String::new(), |mut out, page| {
            out.push_str(page);
            out.push('\n');
            out
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TopNFormatter {
    n: usize,
}

impl TopNFormatter {
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    pub fn format(&self, key: &WindowedKey<String>, set: Option<&RankedSet>) -> TopN {
        let pages = set
            .map(|set| set.top(self.n).map(|record| record.page.clone()).collect())
            .unwrap_or_default();
        TopN { key: key.clone(), pages }
    }

    pub fn top_n(&self, aggregator: &BoundedRankAggregator, key: &WindowedKey<String>) -> TopN {
        aggregator.with_set(key, |set| self.format(key, set))
    }
}

impl Default for TopNFormatter {
    fn default() -> Self {
        Self::new(TopArticlesConfig::default().top_n)
    }
}
