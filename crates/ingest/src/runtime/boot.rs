//! Boot — logging init, config load, pipeline construction.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::conf::PipelineConfig;
use crate::processor::LogProcessor;
use crate::store::LogStore;

/// Initialise the tracing / logging subsystem.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load config and build the pipeline over the given store.
///
/// Must be called inside a tokio runtime; the chunk workers are spawned
/// during construction.
pub fn boot(
    store: Arc<dyn LogStore>,
) -> Result<(Arc<LogProcessor>, PipelineConfig), Box<dyn std::error::Error>> {
    let config = PipelineConfig::load()?;
    Ok((build(store, &config), config))
}

/// Build the pipeline from an already-validated configuration.
pub fn build(store: Arc<dyn LogStore>, config: &PipelineConfig) -> Arc<LogProcessor> {
    info!(
        "Initializing pipeline: max_concurrent={}, workers={}, tick={}ms",
        config.max_concurrent, config.worker_count, config.tick_interval_ms
    );
    Arc::new(LogProcessor::new(store, config))
}
