mod bounds;
mod config;
mod engine;
mod fetcher;
mod manager;
mod model;
mod stats;
mod util;

pub mod policy;
pub mod queue;

// (Re) Exports
pub use bounds::QueueBounds;
pub use config::{Config, FetcherMode};
pub use engine::Engine;
pub use fetcher::{FetchError, FetchExecutor, FetchedContent, RecordSink, UreqExecutor};
pub use manager::{FetchSetEntry, QueueManager};
pub use model::{FetchRequest, FetchSet, ScoredUrl, SKIP_URL_SCORE};
pub use stats::{counter, MetricsSink, Stats};
pub use util::{get_host, grouping_key};

use std::sync::Arc;

pub fn engine(sink: Arc<dyn RecordSink>) -> Engine {
    engine_with_config(Config::default(), sink)
}

pub fn engine_with_config(config: Config, sink: Arc<dyn RecordSink>) -> Engine {
    let executor = Arc::new(UreqExecutor::new(&config));
    Engine::new(config, executor, sink)
}
