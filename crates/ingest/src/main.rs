//! Demo driver: ingest one deployment folder with the in-memory store
//! and report what the pipeline made of it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use ingest::conf::PipelineConfig;
use ingest::parser::detector;
use ingest::parser::model::{FileKind, Priority};
use ingest::queue::model::ProcessingTask;
use ingest::runtime::boot;
use ingest::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    boot::init_logging();

    let folder = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DEPLOYMENT_FOLDER").ok())
        .unwrap_or_else(|| ".".to_string());
    let deployment_id = Path::new(&folder)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "deployment".to_string());

    let mut config = PipelineConfig::load()?;
    // The demo ingests one folder and exits; tier pacing would only
    // stretch that out.
    config.queue.medium_interval_ms = 0;
    config.queue.low_interval_ms = 0;

    let store = Arc::new(MemoryStore::new());
    let processor = boot::build(store.clone(), &config);

    info!("Ingesting deployment folder: {folder}");
    let mut entries = tokio::fs::read_dir(&folder).await?;
    let mut admitted = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let kind = detector::kind_for_filename(&name);
        let priority = match kind {
            FileKind::Installation => Priority::High,
            _ => Priority::Medium,
        };

        let task = ProcessingTask::new(
            &deployment_id,
            None,
            entry.path(),
            kind,
            metadata.len(),
            priority,
        );
        processor.add_task(task).await?;
        admitted += 1;
    }
    info!("Admitted {admitted} tasks for deployment {deployment_id}");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move { processor.run(shutdown_rx).await })
    };

    while !processor.is_idle().await {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let _ = shutdown_tx.send(true);
    runner.await?;

    let metrics = processor.metrics().await;
    info!(
        "Processing finished: completed={}, succeeded={}, failed={}",
        metrics.queue.completed, metrics.queue.success, metrics.queue.errors
    );
    for correlation in &metrics.correlations {
        info!(
            "Error correlation: {} x{} across {:?}",
            correlation.category.as_str(),
            correlation.frequency,
            correlation.affected_components
        );
    }
    info!(
        "Stored records: {} installations, {} configurations, {} events, {} entries",
        store.installations().await.len(),
        store.configurations().await.len(),
        store.events().await.len(),
        store.log_entries().await.len()
    );

    Ok(())
}
