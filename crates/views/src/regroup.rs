use serde::{Deserialize, Serialize};
use ta_core::{RankRecord, WindowedKey};

use crate::count::CountChange;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RankUpdate {
    Retract(RankRecord),
    Add(RankRecord),
}

/// A rank update tagged with the `(window, industry)` key it applies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Regrouped {
    pub key: WindowedKey<String>,
    pub update: RankUpdate,
}

/// Re-keys windowed article counts by industry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Regrouper;

impl Regrouper {
    /// Turns one count change into the retraction of the previous record (when there was
    /// one) followed by the addition of the new record.
    pub fn regroup(change: &CountChange) -> Vec<Regrouped> {
        let article = &change.key.key;
        let key = WindowedKey::new(change.key.window, article.industry.clone());
        let record = |count| RankRecord {
            page: article.page.clone(),
            industry: article.industry.clone(),
            count,
        };

        let mut out = Vec::with_capacity(2);
        if let Some(old) = change.old {
            out.push(Regrouped { key: key.clone(), update: RankUpdate::Retract(record(old)) });
        }
        out.push(Regrouped { key, update: RankUpdate::Add(record(change.new)) });
        out
    }
}
