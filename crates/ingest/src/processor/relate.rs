//! File-relationship tracking.
//!
//! After a task completes, sibling files that belong to the same story
//! are linked in the store: the script an installer log came from, the
//! metadata file of a diagnostic CSP dump, and the other event-log
//! containers collected alongside one. Lookup failures are logged and
//! ignored; relationships are best-effort context, not pipeline state.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::queue::model::ProcessingTask;
use crate::store::LogStore;

pub async fn track_file_relationships(store: &Arc<dyn LogStore>, task: &ProcessingTask) {
    let file_name = match task.file_path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => return,
    };
    let parent = task.file_path.parent().unwrap_or_else(|| Path::new(""));

    // Installer logs link back to the deployment script that ran them.
    if file_name.starts_with("Install_") {
        if let Some(software) = file_name.split('_').nth(1) {
            let script = parent.join("../Scripts").join(software);
            if tokio::fs::metadata(&script).await.is_ok() {
                save(store, task, &script, "installation_script").await;
            }
        }
    }

    // Diagnostic CSP dumps ship a metadata file next to them.
    if file_name.contains("DiagnosticLogCSP") {
        let metadata_file = parent.join("diagnostic_metadata.json");
        if tokio::fs::metadata(&metadata_file).await.is_ok() {
            save(store, task, &metadata_file, "diagnostic_metadata").await;
        }
    }

    // Event logs reference the other containers from the same export.
    if file_name.to_lowercase().ends_with(".evtx") {
        match tokio::fs::read_dir(parent).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.to_lowercase().ends_with(".evtx") && name != file_name {
                        save(store, task, &entry.path(), "event_log_reference").await;
                    }
                }
            }
            Err(error) => {
                debug!("could not scan for related event logs: {error}");
            }
        }
    }
}

async fn save(store: &Arc<dyn LogStore>, task: &ProcessingTask, related: &Path, relation: &str) {
    let source = task.file_path.to_string_lossy();
    let related = related.to_string_lossy();
    if let Err(error) = store
        .save_file_relationship(&source, &related, relation, &task.deployment_id)
        .await
    {
        debug!(relation, "failed to save file relationship: {error}");
    }
}
