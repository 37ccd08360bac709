use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The log kind a provisioning file is classified as when its task is
/// created. Closed set; parser dispatch is an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Application installer output (Install_*.log)
    Installation,
    /// Windows event log, text export or binary .evtx
    Event,
    /// Component / registry configuration log
    Configuration,
    /// Binary .etl trace
    Trace,
    /// Anything we could not classify up front
    General,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Installation => "installation",
            FileKind::Event => "event",
            FileKind::Configuration => "configuration",
            FileKind::Trace => "trace",
            FileKind::General => "general",
        }
    }
}

/// Scheduling priority for a processing task.
///
/// `Ord` is declaration order, so `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
    Unknown,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Unknown => "unknown",
        }
    }
}

/// A generic structured log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Which parser or subsystem produced the entry
    pub source: String,
    pub component: Option<String>,
    /// Additional structured context, format-specific
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Started => "started",
            InstallStatus::InProgress => "in_progress",
            InstallStatus::Completed => "completed",
            InstallStatus::Failed => "failed",
        }
    }
}

/// One application installation, assembled from an installer log.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationRecord {
    pub application_name: String,
    pub version: Option<String>,
    pub status: InstallStatus,
    pub start_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub install_location: Option<String>,
    /// Free-form `key=value` lines collected from the log
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Pending,
    Applied,
    Failed,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Pending => "pending",
            ConfigStatus::Applied => "applied",
            ConfigStatus::Failed => "failed",
        }
    }
}

/// One component configuration pass (registry writes, settings, sections).
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationRecord {
    pub config_type: String,
    pub component: String,
    pub status: ConfigStatus,
    pub applied_at: Option<DateTime<Utc>>,
    /// Hierarchical settings: `\`-delimited keys become nested objects,
    /// `[section]` headers group the lines below them.
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub error_message: Option<String>,
}

/// One Windows event, from the text export or the binary container.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event_id: u32,
    pub provider: String,
    pub channel: String,
    pub level: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub task_category: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub metadata: HashMap<String, String>,
}

/// One trace event decoded from a binary .etl record.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub process_id: u32,
    pub thread_id: u32,
    /// Name/value properties from the record's property table
    pub metadata: HashMap<String, String>,
}

/// Everything a parser can emit. Closed set, matched exhaustively when
/// records are persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Entry(LogEntry),
    Installation(InstallationRecord),
    Configuration(ConfigurationRecord),
    Event(EventRecord),
    Trace(TraceRecord),
}

/// Successful parser output: structured records plus an optional
/// priority hint derived from the content.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub records: Vec<LogRecord>,
    pub priority: Option<Priority>,
}

impl Parsed {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self { records, priority: None }
    }

    pub fn with_priority(records: Vec<LogRecord>, priority: Priority) -> Self {
        Self { records, priority: Some(priority) }
    }
}

/// A parse result. Format-level failures carry no partial records.
pub type ParseResult = Result<Parsed, ParseError>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Truncated input: {0}")]
    Truncated(String),

    #[error("Unsupported file kind: {0}")]
    UnsupportedKind(String),

    #[error("Chunk parse failures: {0}")]
    ChunkFailures(String),
}
