//! Page views read as JSON lines.

use std::io::{self, BufRead, ErrorKind, Lines};

use tracing::{error, warn};

use ta_core::PageView;

use crate::metrics::MetricsRegistry;

/// Yields one [`PageView`] per non-empty input line.
///
/// Lines that are not valid UTF-8 or not a JSON page view are skipped and counted as
/// malformed. Any other read error ends the iteration; [`JsonLinesSource::finish`]
/// reports it.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    metrics: MetricsRegistry,
    line_no: u64,
    failure: Option<io::Error>,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R, metrics: MetricsRegistry) -> Self {
        Self { lines: reader.lines(), metrics, line_no: 0, failure: None }
    }

    /// The read error that ended the input early, if any.
    pub fn finish(&mut self) -> io::Result<()> {
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn malformed(&self, reason: &dyn std::fmt::Display) {
        warn!(line = self.line_no, %reason, "skipping unreadable page view");
        self.metrics.inc_events_received(1);
        self.metrics.inc_malformed_dropped(1);
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = PageView;

    fn next(&mut self) -> Option<PageView> {
        if self.failure.is_some() {
            return None;
        }
        loop {
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) if err.kind() == ErrorKind::InvalidData => {
                    self.malformed(&err);
                    continue;
                }
                Err(err) => {
                    error!(line = self.line_no, %err, "page view input failed");
                    self.failure = Some(err);
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PageView>(&line) {
                Ok(view) => return Some(view),
                Err(err) => self.malformed(&err),
            }
        }
    }
}
