use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::window::TumblingWindows;
use crate::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopArticlesConfig {
    /// Tumbling window size.
    pub window_size_ms: u64,
    /// How long a window accepts events after it ends, measured in stream time.
    pub retention_ms: u64,
    pub top_n: usize,
    /// Lock shards of the count store.
    pub shards: usize,
    /// Attempts to redo one event's commit step when the store fails.
    pub max_store_retries: u32,
    pub workers: usize,
}

impl Default for TopArticlesConfig {
    fn default() -> Self {
        Self {
            window_size_ms: TumblingWindows::ONE_HOUR_MS,
            retention_ms: 24 * TumblingWindows::ONE_HOUR_MS,
            top_n: 100,
            shards: 16,
            max_store_retries: 3,
            workers: 1,
        }
    }
}

impl TopArticlesConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: &str| Err(CoreError::InvalidConfig(msg.to_string()));
        if self.window_size_ms == 0 {
            return invalid("window_size_ms must be positive");
        }
        if self.retention_ms < self.window_size_ms {
            return invalid("retention_ms must be at least window_size_ms");
        }
        if self.top_n == 0 {
            return invalid("top_n must be positive");
        }
        if self.shards == 0 {
            return invalid("shards must be positive");
        }
        if self.workers == 0 {
            return invalid("workers must be positive");
        }
        Ok(())
    }

    pub fn windows(&self) -> Result<TumblingWindows, CoreError> {
        TumblingWindows::of(self.window_size_ms)
    }
}
