//! MemoryStore — in-memory test double for the external store.
//!
//! Deterministic [`LogStore`] implementation backed by plain vectors.
//! Tests seed scripted failures to exercise the retry path and read the
//! accumulated writes back through the accessor methods.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::parser::model::{ConfigurationRecord, EventRecord, InstallationRecord, LogEntry};
use crate::queue::model::{ProcessingTask, TaskStatus};

use super::traits::LogStore;
use super::StoreError;

/// One `track_error` call, captured verbatim.
#[derive(Debug, Clone)]
pub struct TrackedError {
    pub deployment_id: String,
    pub phase_id: Option<String>,
    pub category: String,
    pub source: String,
    pub message: String,
    pub stack_trace: Option<String>,
}

/// One `save_file_relationship` call.
#[derive(Debug, Clone)]
pub struct FileRelationship {
    pub source_file: String,
    pub related_file: String,
    pub relation_type: String,
    pub deployment_id: String,
}

#[derive(Default)]
struct Inner {
    tasks: Vec<ProcessingTask>,
    task_statuses: Vec<(String, TaskStatus, Option<String>)>,
    log_entries: Vec<(LogEntry, String)>,
    installations: Vec<(InstallationRecord, String)>,
    configurations: Vec<(ConfigurationRecord, String)>,
    events: Vec<(EventRecord, String)>,
    tracked_errors: Vec<TrackedError>,
    deployment_statuses: Vec<(String, String)>,
    phase_statuses: Vec<(String, String)>,
    relationships: Vec<FileRelationship>,
    failures_remaining: u32,
}

impl Inner {
    /// Consume one scripted failure, if any are armed.
    fn take_failure(&mut self) -> Result<(), StoreError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(StoreError::Unavailable("injected store failure".into()));
        }
        Ok(())
    }
}

/// An in-memory store for deterministic testing and the demo driver.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// Arm the next `count` mutating calls to fail with
    /// `StoreError::Unavailable`.
    pub async fn fail_next(&self, count: u32) {
        self.inner.lock().await.failures_remaining = count;
    }

    // ── Accessors for assertions ────────────────────────────────

    pub async fn saved_tasks(&self) -> Vec<ProcessingTask> {
        self.inner.lock().await.tasks.clone()
    }

    pub async fn task_statuses(&self) -> Vec<(String, TaskStatus, Option<String>)> {
        self.inner.lock().await.task_statuses.clone()
    }

    pub async fn log_entries(&self) -> Vec<(LogEntry, String)> {
        self.inner.lock().await.log_entries.clone()
    }

    pub async fn installations(&self) -> Vec<(InstallationRecord, String)> {
        self.inner.lock().await.installations.clone()
    }

    pub async fn configurations(&self) -> Vec<(ConfigurationRecord, String)> {
        self.inner.lock().await.configurations.clone()
    }

    pub async fn events(&self) -> Vec<(EventRecord, String)> {
        self.inner.lock().await.events.clone()
    }

    pub async fn tracked_errors(&self) -> Vec<TrackedError> {
        self.inner.lock().await.tracked_errors.clone()
    }

    pub async fn deployment_statuses(&self) -> Vec<(String, String)> {
        self.inner.lock().await.deployment_statuses.clone()
    }

    pub async fn phase_statuses(&self) -> Vec<(String, String)> {
        self.inner.lock().await.phase_statuses.clone()
    }

    pub async fn relationships(&self) -> Vec<FileRelationship> {
        self.inner.lock().await.relationships.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

impl LogStore for MemoryStore {
    fn save_task<'a>(&'a self, task: &'a ProcessingTask) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state.tasks.push(task.clone());
            Ok(())
        })
    }

    fn update_task_status<'a>(
        &'a self,
        task_id: &'a str,
        status: TaskStatus,
        error: Option<&'a str>,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state
                .task_statuses
                .push((task_id.to_string(), status, error.map(str::to_string)));
            Ok(())
        })
    }

    fn insert_log_entry<'a>(
        &'a self,
        entry: &'a LogEntry,
        deployment_id: &'a str,
        _phase_id: Option<&'a str>,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state.log_entries.push((entry.clone(), deployment_id.to_string()));
            Ok(())
        })
    }

    fn insert_installation<'a>(
        &'a self,
        record: &'a InstallationRecord,
        deployment_id: &'a str,
        _phase_id: Option<&'a str>,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state.installations.push((record.clone(), deployment_id.to_string()));
            Ok(())
        })
    }

    fn insert_configuration<'a>(
        &'a self,
        record: &'a ConfigurationRecord,
        deployment_id: &'a str,
        _phase_id: Option<&'a str>,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state.configurations.push((record.clone(), deployment_id.to_string()));
            Ok(())
        })
    }

    fn insert_event<'a>(
        &'a self,
        record: &'a EventRecord,
        deployment_id: &'a str,
        _phase_id: Option<&'a str>,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state.events.push((record.clone(), deployment_id.to_string()));
            Ok(())
        })
    }

    fn track_error<'a>(
        &'a self,
        deployment_id: &'a str,
        phase_id: Option<&'a str>,
        category: &'a str,
        source: &'a str,
        message: &'a str,
        stack_trace: Option<&'a str>,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.tracked_errors.push(TrackedError {
                deployment_id: deployment_id.to_string(),
                phase_id: phase_id.map(str::to_string),
                category: category.to_string(),
                source: source.to_string(),
                message: message.to_string(),
                stack_trace: stack_trace.map(str::to_string),
            });
            Ok(())
        })
    }

    fn update_deployment_status<'a>(
        &'a self,
        deployment_id: &'a str,
        status: &'a str,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state
                .deployment_statuses
                .push((deployment_id.to_string(), status.to_string()));
            Ok(())
        })
    }

    fn update_phase_status<'a>(&'a self, phase_id: &'a str, status: &'a str) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state
                .phase_statuses
                .push((phase_id.to_string(), status.to_string()));
            Ok(())
        })
    }

    fn save_file_relationship<'a>(
        &'a self,
        source_file: &'a str,
        related_file: &'a str,
        relation_type: &'a str,
        deployment_id: &'a str,
    ) -> StoreFuture<'a> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.take_failure()?;
            state.relationships.push(FileRelationship {
                source_file: source_file.to_string(),
                related_file: related_file.to_string(),
                relation_type: relation_type.to_string(),
                deployment_id: deployment_id.to_string(),
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::model::{FileKind, Priority};

    fn sample_task() -> ProcessingTask {
        ProcessingTask::new(
            "dep-1",
            None,
            "a.log",
            FileKind::Configuration,
            10,
            Priority::Medium,
        )
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let store = MemoryStore::new();
        store.save_task(&sample_task()).await.unwrap();
        assert_eq!(store.saved_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_consume() {
        let store = MemoryStore::new();
        store.fail_next(2).await;

        assert!(store.save_task(&sample_task()).await.is_err());
        assert!(store.save_task(&sample_task()).await.is_err());
        assert!(store.save_task(&sample_task()).await.is_ok());
        assert_eq!(store.saved_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_track_error_is_not_affected_by_scripted_failures() {
        let store = MemoryStore::new();
        store.fail_next(1).await;

        // Error tracking must keep working while writes fail, the way
        // the real pipeline reports retry attempts during an outage.
        store
            .track_error("dep-1", None, "retry_attempt", "test", "attempt failed", None)
            .await
            .unwrap();
        assert_eq!(store.tracked_errors().await.len(), 1);
    }
}
