use std::collections::HashMap;

use chrono::Utc;

use crate::parser::model::{
    InstallStatus, InstallationRecord, LogRecord, Parsed, ParseError, ParseResult, Priority,
};
use crate::parser::timestamp::leading_timestamp;
use crate::parser::traits::{FileKind, LogFileParser};

/// Parser for application installer logs.
///
/// The first line must name the application and a four-part version
/// (`Installing FooApp 1.2.3.4`); without it the whole parse fails.
/// Later lines drive the status machine and collect metadata.
pub struct InstallationLogParser;

impl LogFileParser for InstallationLogParser {
    fn parse(&self, raw: &[u8]) -> ParseResult {
        let content = String::from_utf8_lossy(raw);
        let mut lines = content.lines();

        let first_line = lines.next().unwrap_or("");
        let (application_name, version) = match parse_header(first_line) {
            Some(header) => header,
            None => {
                return Err(ParseError::InvalidFormat(
                    "Unable to determine application details".into(),
                ))
            }
        };

        let mut record = InstallationRecord {
            application_name,
            version: Some(version),
            status: InstallStatus::Started,
            start_time: leading_timestamp(first_line).unwrap_or_else(Utc::now),
            completion_time: None,
            error_code: None,
            error_message: None,
            install_location: None,
            metadata: HashMap::new(),
        };

        for line in content.lines() {
            let timestamp = match leading_timestamp(line) {
                Some(ts) => ts,
                None => continue,
            };

            if line.contains("Installation successful") {
                record.status = InstallStatus::Completed;
                record.completion_time = Some(timestamp);
            } else if line.contains("failed") || line.contains("ERROR:") {
                record.status = InstallStatus::Failed;
                record.completion_time = Some(timestamp);
                if let Some((message, code)) = parse_error_detail(line) {
                    record.error_message = Some(message);
                    record.error_code = code;
                }
            } else if line.contains("Installing") {
                record.status = InstallStatus::InProgress;
            }

            if let Some(pos) = line.find("Installing to: ") {
                let location = line[pos + "Installing to: ".len()..].trim();
                if !location.is_empty() {
                    record.install_location = Some(location.to_string());
                }
            }

            if let Some((key, value)) = parse_metadata_line(line) {
                record.metadata.insert(key, value);
            }
        }

        Ok(Parsed::with_priority(
            vec![LogRecord::Installation(record)],
            processing_priority(&content),
        ))
    }

    fn kind(&self) -> FileKind {
        FileKind::Installation
    }
}

/// Extract `(application name, version)` from an `Installing <name>
/// <a.b.c.d>` or `Configuring <name> <a.b.c.d>` header line.
fn parse_header(line: &str) -> Option<(String, String)> {
    for verb in ["Installing ", "Configuring "] {
        let rest = match line.find(verb) {
            Some(pos) => line[pos + verb.len()..].trim(),
            None => continue,
        };

        let tokens: Vec<&str> = rest.split_whitespace().collect();
        // The version is the first dotted-quad token after the name.
        let version_idx = tokens
            .iter()
            .position(|token| is_version(token))
            .filter(|&idx| idx >= 1)?;

        return Some((
            tokens[..version_idx].join(" "),
            tokens[version_idx].to_string(),
        ));
    }
    None
}

fn is_version(token: &str) -> bool {
    let mut segments = 0;
    for segment in token.split('.') {
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        segments += 1;
    }
    segments == 4
}

/// Pull `ERROR: <message> (<code>)` out of a failure line; the code is
/// optional.
fn parse_error_detail(line: &str) -> Option<(String, Option<String>)> {
    let pos = line.find("ERROR: ")?;
    let detail = line[pos + "ERROR: ".len()..].trim();
    if detail.is_empty() {
        return None;
    }

    if detail.ends_with(')') {
        if let Some(open) = detail.rfind(" (") {
            let code = &detail[open + 2..detail.len() - 1];
            if !code.is_empty()
                && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Some((detail[..open].to_string(), Some(code.to_string())));
            }
        }
    }

    Some((detail.to_string(), None))
}

/// `Adding <key>=<value>` metadata lines.
fn parse_metadata_line(line: &str) -> Option<(String, String)> {
    let pos = line.find("Adding ")?;
    let rest = &line[pos + "Adding ".len()..];
    let eq = rest.find('=')?;
    let key = rest[..eq].trim();
    let value = rest[eq + 1..].trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Installer progress and failures both warrant immediate attention.
fn processing_priority(content: &str) -> Priority {
    if content.contains("ERROR:") || content.contains("failed") {
        return Priority::High;
    }
    if content.contains("Installing") || content.contains("Configuration") {
        return Priority::High;
    }
    Priority::Medium
}
