//! LogStore trait — abstract interface to the durable task/log store.
//!
//! The surrounding system owns persistence and notification; the
//! pipeline only ever calls through this trait. `memory.rs` provides an
//! in-memory test double.

use std::future::Future;
use std::pin::Pin;

use crate::parser::model::{ConfigurationRecord, EventRecord, InstallationRecord, LogEntry};
use crate::queue::model::{ProcessingTask, TaskStatus};

use super::StoreError;

type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

/// Narrow async interface over the external store.
///
/// Object-safe thanks to `Pin<Box<…>>` returns. Implementations must be
/// `Send + Sync` so they can sit behind an `Arc` shared with the
/// control loop.
pub trait LogStore: Send + Sync {
    // ── Task lifecycle ──────────────────────────────────────────

    fn save_task<'a>(&'a self, task: &'a ProcessingTask) -> StoreFuture<'a>;

    fn update_task_status<'a>(
        &'a self,
        task_id: &'a str,
        status: TaskStatus,
        error: Option<&'a str>,
    ) -> StoreFuture<'a>;

    // ── Structured records ──────────────────────────────────────

    fn insert_log_entry<'a>(
        &'a self,
        entry: &'a LogEntry,
        deployment_id: &'a str,
        phase_id: Option<&'a str>,
    ) -> StoreFuture<'a>;

    fn insert_installation<'a>(
        &'a self,
        record: &'a InstallationRecord,
        deployment_id: &'a str,
        phase_id: Option<&'a str>,
    ) -> StoreFuture<'a>;

    fn insert_configuration<'a>(
        &'a self,
        record: &'a ConfigurationRecord,
        deployment_id: &'a str,
        phase_id: Option<&'a str>,
    ) -> StoreFuture<'a>;

    fn insert_event<'a>(
        &'a self,
        record: &'a EventRecord,
        deployment_id: &'a str,
        phase_id: Option<&'a str>,
    ) -> StoreFuture<'a>;

    // ── Errors & status ─────────────────────────────────────────

    fn track_error<'a>(
        &'a self,
        deployment_id: &'a str,
        phase_id: Option<&'a str>,
        category: &'a str,
        source: &'a str,
        message: &'a str,
        stack_trace: Option<&'a str>,
    ) -> StoreFuture<'a>;

    fn update_deployment_status<'a>(
        &'a self,
        deployment_id: &'a str,
        status: &'a str,
    ) -> StoreFuture<'a>;

    fn update_phase_status<'a>(&'a self, phase_id: &'a str, status: &'a str) -> StoreFuture<'a>;

    // ── File relationships ──────────────────────────────────────

    fn save_file_relationship<'a>(
        &'a self,
        source_file: &'a str,
        related_file: &'a str,
        relation_type: &'a str,
        deployment_id: &'a str,
    ) -> StoreFuture<'a>;
}
