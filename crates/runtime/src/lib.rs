//! Runtime bootstrap: tracing, the timely runtime and the pipeline driver with its input and output.

use anyhow::Result;
use tracing::{info, Level};

pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use pipeline::{Outcome, Pipeline, PipelineError, StopHandle};
pub use sink::{CollectingSink, JsonLinesSink, Sink};
pub use source::JsonLinesSource;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Start a timely runtime configured from the command line and execute the provided
/// closure once per worker.
pub fn start_runtime<F>(workers: usize, f: F) -> Result<()>
where
    F: Fn(usize, &mut timely::worker::Worker<timely::communication::allocator::Generic>) + Clone + Send + Sync + 'static,
{
    info!(%workers, "starting timely runtime");
    let config = timely::Config::process(workers);
    timely::execute(config, move |worker| {
        let index = worker.index();
        f(index, worker);
    })
    .map_err(|err| anyhow::anyhow!("timely runtime failed: {err}"))?;
    Ok(())
}
