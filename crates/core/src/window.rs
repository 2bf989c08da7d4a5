use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Half-open time interval `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Window {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start_ms, self.end_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowedKey<K> {
    pub window: Window,
    pub key: K,
}

impl<K> WindowedKey<K> {
    pub fn new(window: Window, key: K) -> Self {
        Self { window, key }
    }
}

/// Assigns timestamps to fixed-size, epoch-aligned, non-overlapping windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TumblingWindows {
    size_ms: u64,
}

impl TumblingWindows {
    pub const ONE_HOUR_MS: u64 = 60 * 60 * 1000;

    pub fn of(size_ms: u64) -> Result<Self, CoreError> {
        if size_ms == 0 {
            return Err(CoreError::InvalidConfig("window size must be positive".into()));
        }
        Ok(Self { size_ms })
    }

    pub fn hourly() -> Self {
        Self { size_ms: Self::ONE_HOUR_MS }
    }

    /// The single window containing `ts_ms`.
    pub fn assign(&self, ts_ms: u64) -> Window {
        let start = (ts_ms / self.size_ms) * self.size_ms;
        Window::new(start, start.saturating_add(self.size_ms))
    }

    /// Window that starts at `start_ms`; used when decoding keys that only carry the start.
    pub fn window_at(&self, start_ms: u64) -> Window {
        Window::new(start_ms, start_ms.saturating_add(self.size_ms))
    }
}

impl Default for TumblingWindows {
    fn default() -> Self {
        Self::hourly()
    }
}
