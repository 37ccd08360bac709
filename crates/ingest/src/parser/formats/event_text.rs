use std::collections::HashMap;

use chrono::Utc;

use crate::parser::model::{EventRecord, LogRecord, Parsed, ParseResult, Priority};
use crate::parser::timestamp::normalize_timestamp;
use crate::parser::traits::{FileKind, LogFileParser};

/// Parser for text exports of event log entries.
///
/// Extracts the labeled fields (`Id`, `ProviderName`, `TimeCreated`,
/// `Message`, `TaskCategory`, `Keywords`); any other `Key: Value` line
/// folds into metadata.
pub struct EventLogTextParser;

const KNOWN_LABELS: [&str; 6] = [
    "Id",
    "ProviderName",
    "TimeCreated",
    "Message",
    "TaskCategory",
    "Keywords",
];

impl LogFileParser for EventLogTextParser {
    fn parse(&self, raw: &[u8]) -> ParseResult {
        let content = String::from_utf8_lossy(raw);

        let mut record = EventRecord {
            event_id: 0,
            provider: String::new(),
            channel: String::new(),
            level: "Information".to_string(),
            timestamp: Utc::now(),
            message: String::new(),
            task_category: None,
            keywords: None,
            metadata: HashMap::new(),
        };

        for line in content.lines() {
            let (label, value) = match split_labeled_line(line) {
                Some(pair) => pair,
                None => continue,
            };

            match label {
                "Id" => {
                    if let Ok(id) = value.parse::<u32>() {
                        record.event_id = id;
                    }
                }
                "ProviderName" => record.provider = value.to_string(),
                "TimeCreated" => record.timestamp = normalize_timestamp(value),
                "Message" => record.message = value.to_string(),
                "TaskCategory" => record.task_category = Some(value.to_string()),
                "Keywords" => {
                    record.keywords =
                        Some(value.split(',').map(|k| k.trim().to_string()).collect())
                }
                other => {
                    record.metadata.insert(other.to_string(), value.to_string());
                }
            }
        }

        let lowered = record.message.to_lowercase();
        if lowered.contains("error") {
            record.level = "Error".to_string();
        } else if lowered.contains("warn") {
            record.level = "Warning".to_string();
        }

        Ok(Parsed::with_priority(
            vec![LogRecord::Event(record)],
            processing_priority(&content),
        ))
    }

    fn kind(&self) -> FileKind {
        FileKind::Event
    }
}

/// Split a `Label : Value` line. The label must be a single bare word;
/// prose lines containing a stray colon are not fields.
fn split_labeled_line(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let label = line[..colon].trim();
    let value = line[colon + 1..].trim();

    if label.is_empty() || value.is_empty() {
        return None;
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((label, value))
}

/// Critical events and enrollment failures go first; routine status
/// events can wait.
fn processing_priority(content: &str) -> Priority {
    if ["Error", "Critical", "Authentication failed", "Device enrollment"]
        .iter()
        .any(|k| content.contains(k))
    {
        return Priority::High;
    }
    if ["Warning", "Configuration changed", "Policy applied"]
        .iter()
        .any(|k| content.contains(k))
    {
        return Priority::Medium;
    }
    Priority::Low
}
