use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use ta_views::TopN;

/// Receives the refreshed top-N of every `(window, industry)` whose ranking changed.
pub trait Sink: Send + Sync {
    fn emit(&self, result: &TopN) -> io::Result<()>;
}

/// Keeps every emitted result in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<TopN>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<TopN> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The most recent result per key, ordered by key.
    pub fn latest(&self) -> Vec<TopN> {
        let mut latest = std::collections::BTreeMap::new();
        for result in self.results() {
            latest.insert(result.key.clone(), result);
        }
        latest.into_values().collect()
    }
}

impl Sink for CollectingSink {
    fn emit(&self, result: &TopN) -> io::Result<()> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }
}

/// Writes each result as one JSON object per line.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn emit(&self, result: &TopN) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *out, result)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}
