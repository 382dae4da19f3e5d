use color_eyre::Report;
use innlevering::announcer::Announcer;
use innlevering::config::{self, ConfigSource};
use innlevering::db_connect;
use innlevering::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

mod submitter;
use submitter::Submitters;

mod handler;
use handler::Handler;

/// Wires the store, metrics and announcer into the submit loop and runs it
/// until `shutdown`. A metrics exporter serves `metrics.encode()` and a web
/// listener calls `announcer.subscribe()`, both on the `Arc`s built here.
pub async fn main(
    source: Arc<dyn ConfigSource>,
    config: config::Root,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), Report> {
    let db = db_connect(&config.database.url).await?;
    db.init_schema().await?;

    let metrics = Arc::new(Metrics::load(&db).await?);
    let announcer = Arc::new(Announcer::new(config.announcer.capacity));

    let handler = Handler::new(db, source, Submitters::default(), announcer, metrics).await?;

    info!(
        "submitting with {} every {}s, at most {} flags",
        config.submit.protocol_name, config.submit.period, config.submit.flag_limit
    );

    handler.run(shutdown).await
}
