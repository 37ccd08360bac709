//! Orchestrator: the control loop that pulls tasks from the priority
//! queue, parses their files through the chunk engine, persists the
//! records, and drives task lifecycle state.
//!
//! The loop is the sole mutator of queue state; everything it shares
//! with callers goes through the queue mutex or the error handler's
//! correlation table. Workers inside the chunk engine never see the
//! queue or the store.

pub mod relate;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::conf::PipelineConfig;
use crate::engine::ChunkEngine;
use crate::error::handler::ErrorCorrelation;
use crate::error::{ErrorContext, ErrorHandler, PipelineError};
use crate::parser::detector;
use crate::parser::model::{
    InstallStatus, LogEntry, LogRecord, Parsed, ParseError, TraceRecord,
};
use crate::queue::model::{ProcessingTask, QueueMetrics, TaskStatus};
use crate::queue::priority::PriorityQueue;
use crate::store::LogStore;

/// Combined pipeline snapshot: queue state plus error correlations.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub queue: QueueMetrics,
    pub correlations: Vec<ErrorCorrelation>,
}

pub struct LogProcessor {
    store: Arc<dyn LogStore>,
    queue: Mutex<PriorityQueue>,
    errors: ErrorHandler,
    engine: ChunkEngine,
    tick_interval: Duration,
}

impl LogProcessor {
    /// Build a pipeline over the given store. Must be called inside a
    /// tokio runtime; the chunk workers are spawned here.
    pub fn new(store: Arc<dyn LogStore>, config: &PipelineConfig) -> Self {
        Self {
            queue: Mutex::new(PriorityQueue::with_policies(
                config.max_concurrent,
                config.tier_policies(),
            )),
            errors: ErrorHandler::new(Arc::clone(&store), config.retry_policy()),
            engine: ChunkEngine::new(config.worker_count, config.chunk_size_bytes),
            tick_interval: config.tick_interval(),
            store,
        }
    }

    /// Admit a task: enqueue (deduplicated per tier) and persist it.
    /// The store write is retried with backoff; a duplicate is dropped
    /// without error.
    pub async fn add_task(&self, task: ProcessingTask) -> Result<(), PipelineError> {
        let accepted = self.queue.lock().await.enqueue(task.clone());
        if !accepted {
            debug!(task_id = %task.id, "duplicate task dropped at enqueue");
            return Ok(());
        }

        let context = ErrorContext::new(task.deployment_id.clone(), "task_creation")
            .with_phase(task.phase_id.clone())
            .with_component("queue");
        let task_ref = &task;
        let result = self
            .errors
            .retry_with_backoff(
                || async move {
                    self.store
                        .save_task(task_ref)
                        .await
                        .map_err(PipelineError::from)
                },
                &context,
            )
            .await;

        if let Err(failure) = result {
            if let Err(store_error) = self.errors.handle_error(&failure, &context).await {
                warn!("failed to report task-creation error: {store_error}");
            }
            return Err(failure);
        }
        Ok(())
    }

    /// Drive the pipeline until the shutdown flag flips or its sender
    /// is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("log processor started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.process_next_batch().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("log processor stopped");
    }

    /// One scheduling decision: take the next batch and process its
    /// members concurrently. Public so tests and callers can step the
    /// pipeline without the timer.
    pub async fn process_next_batch(&self) {
        let batch = self.queue.lock().await.dequeue_batch(Instant::now());
        if batch.is_empty() {
            return;
        }

        debug!(batch = batch.len(), "dispatching batch");
        join_all(batch.into_iter().map(|task| self.process_task(task))).await;
    }

    pub async fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            queue: self.queue.lock().await.metrics(),
            correlations: self.errors.correlations(),
        }
    }

    /// True when nothing is queued or in flight.
    pub async fn is_idle(&self) -> bool {
        self.queue.lock().await.is_idle()
    }

    async fn process_task(&self, mut task: ProcessingTask) {
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        if let Err(store_error) = self
            .store
            .update_task_status(&task.id, TaskStatus::Processing, None)
            .await
        {
            warn!(task_id = %task.id, "failed to record processing status: {store_error}");
        }

        let context = ErrorContext::new(task.deployment_id.clone(), "task_processing")
            .with_phase(task.phase_id.clone())
            .with_component(task.file_kind.as_str());

        // Transient failures (the file read) are retried; a parse
        // verdict is a value and comes back through the inner result.
        let task_ref = &task;
        let outcome = self
            .errors
            .retry_with_backoff(|| self.read_and_parse(task_ref), &context)
            .await;

        match outcome {
            Ok(Ok(parsed)) => {
                if let Some(hint) = parsed.priority {
                    if hint != task.priority {
                        debug!(
                            task_id = %task.id,
                            assigned = task.priority.as_str(),
                            hint = hint.as_str(),
                            "content priority hint disagrees with task priority"
                        );
                    }
                }
                self.persist_result(&task, parsed).await;
            }
            Ok(Err(parse_error)) => {
                self.fail_task(&task, PipelineError::Parse(parse_error), "task_processing")
                    .await;
            }
            Err(failure) => {
                self.fail_task(&task, failure, "task_processing").await;
            }
        }
    }

    /// Read the file and parse it with the signature-resolved parser.
    /// The outer error is retryable; the inner one is a parse verdict.
    async fn read_and_parse(
        &self,
        task: &ProcessingTask,
    ) -> Result<Result<Parsed, ParseError>, PipelineError> {
        let data = tokio::fs::read(&task.file_path).await?;
        let parser = match detector::resolve(task.file_kind, &data) {
            Ok(parser) => parser,
            Err(unsupported) => return Ok(Err(unsupported)),
        };
        Ok(self.engine.parse(parser, Bytes::from(data)).await)
    }

    async fn persist_result(&self, task: &ProcessingTask, parsed: Parsed) {
        let context = ErrorContext::new(task.deployment_id.clone(), "result_processing")
            .with_phase(task.phase_id.clone())
            .with_component(task.file_kind.as_str());

        let parsed_ref = &parsed;
        let result = self
            .errors
            .retry_with_backoff(|| self.save_records(task, parsed_ref), &context)
            .await;

        match result {
            Ok(()) => {
                relate::track_file_relationships(&self.store, task).await;
                self.queue.lock().await.complete_task(&task.id, true, None);
                if let Err(store_error) = self
                    .store
                    .update_task_status(&task.id, TaskStatus::Completed, None)
                    .await
                {
                    warn!(task_id = %task.id, "failed to record completed status: {store_error}");
                }
                debug!(task_id = %task.id, records = parsed.records.len(), "task completed");
            }
            Err(failure) => self.fail_task(task, failure, "result_processing").await,
        }
    }

    async fn save_records(
        &self,
        task: &ProcessingTask,
        parsed: &Parsed,
    ) -> Result<(), PipelineError> {
        let deployment = task.deployment_id.as_str();
        let phase = task.phase_id.as_deref();

        for record in &parsed.records {
            match record {
                LogRecord::Installation(record) => {
                    self.store
                        .insert_installation(record, deployment, phase)
                        .await?;
                    if record.status == InstallStatus::Completed {
                        if let Some(phase_id) = phase {
                            self.store.update_phase_status(phase_id, "completed").await?;
                        }
                    }
                }
                LogRecord::Configuration(record) => {
                    self.store
                        .insert_configuration(record, deployment, phase)
                        .await?;
                }
                LogRecord::Event(record) => {
                    self.store.insert_event(record, deployment, phase).await?;
                }
                LogRecord::Trace(record) => {
                    let entry = trace_entry(record);
                    self.store.insert_log_entry(&entry, deployment, phase).await?;
                }
                LogRecord::Entry(entry) => {
                    self.store.insert_log_entry(entry, deployment, phase).await?;
                }
            }
        }
        Ok(())
    }

    /// Terminal failure: report it, release the queue slot, record the
    /// status with a human-readable message.
    async fn fail_task(&self, task: &ProcessingTask, failure: PipelineError, source: &str) {
        let message = failure.to_string();
        let context = ErrorContext::new(task.deployment_id.clone(), source)
            .with_phase(task.phase_id.clone())
            .with_component(task.file_kind.as_str());
        if let Err(store_error) = self.errors.handle_error(&failure, &context).await {
            warn!("failed to report task failure: {store_error}");
        }

        self.queue
            .lock()
            .await
            .complete_task(&task.id, false, Some(message.clone()));
        if let Err(store_error) = self
            .store
            .update_task_status(&task.id, TaskStatus::Failed, Some(&message))
            .await
        {
            warn!(task_id = %task.id, "failed to record failed status: {store_error}");
        }
        error!(task_id = %task.id, "task failed: {message}");
    }
}

/// Trace records persist as generic log entries; the store has no
/// trace-specific table.
fn trace_entry(record: &TraceRecord) -> LogEntry {
    LogEntry {
        timestamp: record.timestamp,
        level: record.level,
        message: record.message.clone(),
        source: "ETL Trace".to_string(),
        component: None,
        context: Some(serde_json::json!({
            "process_id": record.process_id,
            "thread_id": record.thread_id,
            "metadata": record.metadata,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::model::{FileKind, Priority};
    use crate::store::MemoryStore;
    use std::path::Path;

    const INSTALL_LOG: &str = "\
2024-01-01 10:00:00 INFO: Installing FooApp 1.2.3.4
2024-01-01 10:01:00 INFO: Installing to: C:\\Apps\\FooApp
2024-01-01 10:05:00 INFO: Installation successful";

    fn pipeline() -> (Arc<LogProcessor>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(LogProcessor::new(
            store.clone(),
            &PipelineConfig::default(),
        ));
        (processor, store)
    }

    fn install_task(path: &Path) -> ProcessingTask {
        ProcessingTask::new(
            "dep-1",
            Some("phase-sw".to_string()),
            path,
            FileKind::Installation,
            INSTALL_LOG.len() as u64,
            Priority::High,
        )
    }

    async fn drain(processor: &LogProcessor) {
        while !processor.is_idle().await {
            processor.process_next_batch().await;
        }
    }

    #[tokio::test]
    async fn test_installation_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Install_FooApp_1.2.3.4.log");
        std::fs::write(&path, INSTALL_LOG).unwrap();

        let (processor, store) = pipeline();
        processor.add_task(install_task(&path)).await.unwrap();
        drain(&processor).await;

        let installations = store.installations().await;
        assert_eq!(installations.len(), 1);
        let (record, deployment) = &installations[0];
        assert_eq!(record.application_name, "FooApp");
        assert_eq!(record.version.as_deref(), Some("1.2.3.4"));
        assert_eq!(record.status, InstallStatus::Completed);
        assert_eq!(
            record.completion_time.map(|t| t.to_rfc3339()),
            Some("2024-01-01T10:05:00+00:00".to_string())
        );
        assert_eq!(deployment, "dep-1");

        // Completed installation promotes the owning phase.
        assert_eq!(
            store.phase_statuses().await,
            vec![("phase-sw".to_string(), "completed".to_string())]
        );

        let statuses = store.task_statuses().await;
        assert_eq!(statuses.first().map(|s| s.1), Some(TaskStatus::Processing));
        assert_eq!(statuses.last().map(|s| s.1), Some(TaskStatus::Completed));

        let metrics = processor.metrics().await;
        assert_eq!(metrics.queue.completed, 1);
        assert_eq!(metrics.queue.success, 1);
    }

    #[tokio::test]
    async fn test_add_task_persists_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Install_FooApp_1.2.3.4.log");
        std::fs::write(&path, INSTALL_LOG).unwrap();

        let (processor, store) = pipeline();
        processor.add_task(install_task(&path)).await.unwrap();
        processor.add_task(install_task(&path)).await.unwrap();

        // The duplicate never reaches the store.
        assert_eq!(store.saved_tasks().await.len(), 1);
        assert_eq!(processor.metrics().await.queue.queued.high, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_fails_after_retries() {
        let (processor, store) = pipeline();
        let task = install_task(Path::new("/no/such/file.log"));
        let task_id = task.id.clone();
        processor.add_task(task).await.unwrap();
        drain(&processor).await;

        let statuses = store.task_statuses().await;
        let last = statuses.last().unwrap();
        assert_eq!(last.0, task_id);
        assert_eq!(last.1, TaskStatus::Failed);
        assert!(last.2.as_deref().unwrap().contains("3 attempts"));

        let retries = store
            .tracked_errors()
            .await
            .into_iter()
            .filter(|e| e.category == "retry_attempt")
            .count();
        assert_eq!(retries, 3);

        let metrics = processor.metrics().await;
        assert_eq!(metrics.queue.errors, 1);
        assert_eq!(metrics.queue.success, 0);
    }

    #[tokio::test]
    async fn test_bad_magic_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        // An installation log without the mandatory application header.
        let path = dir.path().join("Install_Broken_1.0.log");
        std::fs::write(&path, "no header here").unwrap();

        let (processor, store) = pipeline();
        processor.add_task(install_task(&path)).await.unwrap();
        drain(&processor).await;

        let statuses = store.task_statuses().await;
        assert_eq!(statuses.last().map(|s| s.1), Some(TaskStatus::Failed));
        // A format verdict is not a transient failure: no retry records.
        assert!(store
            .tracked_errors()
            .await
            .iter()
            .all(|e| e.category != "retry_attempt"));
    }

    #[tokio::test]
    async fn test_unsupported_kind_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mystery.bin");
        std::fs::write(&path, "payload").unwrap();

        let (processor, store) = pipeline();
        let task = ProcessingTask::new(
            "dep-1",
            None,
            &path,
            FileKind::General,
            7,
            Priority::Medium,
        );
        processor.add_task(task).await.unwrap();
        drain(&processor).await;

        let statuses = store.task_statuses().await;
        let last = statuses.last().unwrap();
        assert_eq!(last.1, TaskStatus::Failed);
        assert!(last.2.as_deref().unwrap().contains("Unsupported file kind"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_store_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Install_FooApp_1.2.3.4.log");
        std::fs::write(&path, INSTALL_LOG).unwrap();

        let (processor, store) = pipeline();
        processor.add_task(install_task(&path)).await.unwrap();

        // The first two writes fail: the (non-fatal) processing-status
        // update and the installation insert. The insert is retried.
        store.fail_next(2).await;
        drain(&processor).await;

        assert_eq!(store.installations().await.len(), 1);
        let statuses = store.task_statuses().await;
        assert_eq!(statuses.last().map(|s| s.1), Some(TaskStatus::Completed));

        let retries = store
            .tracked_errors()
            .await
            .into_iter()
            .filter(|e| e.category == "retry_attempt")
            .count();
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn test_binary_trace_end_to_end() {
        use crate::parser::formats::etl::testutil as etl_util;
        use chrono::TimeZone;

        let ts = chrono::Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let file = etl_util::build_file(&[
            etl_util::build_record(ts, 0x0002, 4, 8, "enrollment handshake refused"),
            etl_util::build_record(ts, 0x0008, 4, 8, "retrying enrollment"),
        ]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.etl");
        std::fs::write(&path, &file).unwrap();

        let (processor, store) = pipeline();
        let task = ProcessingTask::new(
            "dep-1",
            None,
            &path,
            FileKind::Trace,
            file.len() as u64,
            Priority::Medium,
        );
        processor.add_task(task).await.unwrap();
        drain(&processor).await;

        let entries = store.log_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.source, "ETL Trace");
        assert_eq!(entries[0].0.message, "enrollment handshake refused");
    }

    #[tokio::test]
    async fn test_run_loop_shutdown() {
        let (processor, _store) = pipeline();
        let (tx, rx) = watch::channel(false);

        let runner = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(rx).await })
        };

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("run loop must stop on shutdown")
            .unwrap();
    }
}
