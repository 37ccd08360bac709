use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parser::model::{FileKind, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states are final; no task re-enters `pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// The unit of work: parse one file for one deployment.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingTask {
    pub id: String,
    pub deployment_id: String,
    pub phase_id: Option<String>,
    pub file_path: PathBuf,
    pub file_kind: FileKind,
    /// Declared size, used for queue ordering; not re-checked here
    pub file_size: u64,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProcessingTask {
    pub fn new(
        deployment_id: impl Into<String>,
        phase_id: Option<String>,
        file_path: impl Into<PathBuf>,
        file_kind: FileKind,
        file_size: u64,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            deployment_id: deployment_id.into(),
            phase_id,
            file_path: file_path.into(),
            file_kind,
            file_size,
            priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Read-only snapshot of queue state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    pub queued: QueuedCounts,
    pub in_progress: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueuedCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}
