use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use differential_dataflow::input::InputSession;
use timely::dataflow::operators::probe::Handle as ProbeHandle;

use ta_core::{ArticleFilter, ArticleKey, PageView, ScopeFilter, TopArticlesConfig, WindowedKey};
use ta_runtime::metrics::{MetricsRegistry, RunTimer};
use ta_runtime::{init_tracing, start_runtime, JsonLinesSink, JsonLinesSource, Pipeline};
use ta_views::dataflow::top_articles;
use ta_views::TopN;

/// Top-N most viewed articles per industry over tumbling windows.
///
/// Reads page views as JSON lines (`{"page":..,"industry":..,"flags":..,"ts_ms":..}`) and
/// writes one JSON line per refreshed ranking.
#[derive(Debug, Parser)]
#[command(name = "top_articles")]
struct Args {
    /// Page-view input; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    top_n: Option<usize>,
    #[arg(long)]
    window_size_ms: Option<u64>,
    #[arg(long)]
    retention_ms: Option<u64>,
    #[arg(long)]
    workers: Option<usize>,
    /// Generate this many synthetic page views instead of reading input.
    #[arg(long)]
    synthetic: Option<u64>,
    /// Compute the view with the differential dataflow instead of the incremental engine.
    #[arg(long)]
    dataflow: bool,
}

impl Args {
    fn config(&self) -> Result<TopArticlesConfig> {
        let mut cfg = match &self.config {
            Some(path) => TopArticlesConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => TopArticlesConfig::default(),
        };
        if let Some(top_n) = self.top_n {
            cfg.top_n = top_n;
        }
        if let Some(size) = self.window_size_ms {
            cfg.window_size_ms = size;
        }
        if let Some(retention) = self.retention_ms {
            cfg.retention_ms = retention;
        }
        if let Some(workers) = self.workers {
            cfg.workers = workers;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn source(&self, metrics: &MetricsRegistry) -> Result<JsonLinesSource<Box<dyn BufRead>>> {
        let reader: Box<dyn BufRead> = match &self.input {
            Some(path) => Box::new(BufReader::new(
                File::open(path).with_context(|| format!("opening {}", path.display()))?,
            )),
            None => Box::new(BufReader::new(io::stdin())),
        };
        Ok(JsonLinesSource::new(reader, metrics.clone()))
    }
}

/// Deterministic skewed traffic over a few industries, spread across three hours.
fn synthetic_view(i: u64) -> PageView {
    const INDUSTRIES: [&str; 4] = ["finance", "sports", "tech", "health"];
    let page = format!("article-{}", (i * 31 + i / 7) % 97);
    let flags = if i % 9 == 0 { "IMG" } else { "ART" };
    let ts_ms = (i * 1_237) % (3 * 3_600_000);
    PageView::new(&page, INDUSTRIES[(i % 4) as usize], flags, ts_ms as i64)
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = args.config()?;
    info!(?cfg, dataflow = args.dataflow, "top_articles starting");

    if args.dataflow {
        return run_dataflow(&args, cfg);
    }

    let metrics = MetricsRegistry::default();
    let pipeline = Pipeline::in_memory(cfg)?.with_metrics(metrics.clone());
    let sink = JsonLinesSink::new(io::stdout());
    let timer = RunTimer::start();
    let snapshot = match args.synthetic {
        Some(n) => pipeline.run_partitioned((0..n).map(synthetic_view), &sink)?,
        None => {
            let mut source = args.source(&metrics)?;
            let snapshot = pipeline.run_partitioned(source.by_ref(), &sink)?;
            source.finish().context("reading page views")?;
            snapshot
        }
    };
    info!(metrics = %snapshot.to_json_line("final", Some(timer.elapsed())), "top_articles finished");
    Ok(())
}

fn run_dataflow(args: &Args, cfg: TopArticlesConfig) -> Result<()> {
    let windows = cfg.windows()?;
    let events: Vec<PageView> = match args.synthetic {
        Some(n) => (0..n).map(synthetic_view).collect(),
        None => {
            let mut source = args.source(&MetricsRegistry::default())?;
            let events: Vec<PageView> = source.by_ref().collect();
            source.finish().context("reading page views")?;
            events
        }
    };
    let views: Vec<_> = events
        .into_iter()
        .filter(|view| ArticleFilter.is_in_scope(view))
        .filter_map(|view| match view.validate() {
            Ok(view) => Some(view),
            Err(err) => {
                warn!(%err, "dropping malformed event");
                None
            }
        })
        .map(|view| WindowedKey::new(windows.assign(view.ts_ms), view.key))
        .collect();
    let views = Arc::new(views);
    let top_n = cfg.top_n;

    start_runtime(cfg.workers, move |index, worker| {
        let mut input: InputSession<u64, WindowedKey<ArticleKey>, isize> = InputSession::new();
        let mut probe = ProbeHandle::new();

        worker.dataflow::<u64, _, _>(|scope| {
            top_articles(&input.to_collection(scope), top_n)
                .inspect(|((key, pages), _time, diff)| {
                    if *diff > 0 {
                        let result = TopN { key: key.clone(), pages: pages.clone() };
                        match serde_json::to_string(&result) {
                            Ok(line) => println!("{line}"),
                            Err(err) => warn!(%err, "failed to encode ranking"),
                        }
                    }
                })
                .probe_with(&mut probe);
        });

        if index == 0 {
            for view in views.iter() {
                input.insert(view.clone());
            }
        }
        input.advance_to(1);
        input.flush();
        while probe.less_than(input.time()) {
            worker.step();
        }
        info!(worker = index, "dataflow drained");
    })
}
