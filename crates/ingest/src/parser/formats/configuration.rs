use chrono::Utc;
use serde_json::{Map, Value};

use crate::parser::model::{
    ConfigStatus, ConfigurationRecord, LogRecord, Parsed, ParseResult, Priority,
};
use crate::parser::timestamp::leading_timestamp;
use crate::parser::traits::{FileKind, LogFileParser};

/// Parser for component configuration logs.
///
/// Collects registry-style `Adding <key>=<value>` lines into a nested
/// settings map (`\`-delimited keys become nested objects), groups
/// `[section]` blocks, and tracks applied/failed status from phrase
/// matching. Always yields a record; status may remain `pending`.
pub struct ConfigurationLogParser;

const CONFIG_TYPES: [&str; 3] = ["settings", "configuration", "registry"];

impl LogFileParser for ConfigurationLogParser {
    fn parse(&self, raw: &[u8]) -> ParseResult {
        let content = String::from_utf8_lossy(raw);

        let mut record = ConfigurationRecord {
            config_type: String::new(),
            component: String::new(),
            status: ConfigStatus::Pending,
            applied_at: None,
            settings: Map::new(),
            error_message: None,
        };

        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let timestamp = leading_timestamp(line);

            if line.contains("Configuring") {
                if let Some((component, config_type)) = parse_config_header(line) {
                    record.component = component;
                    record.config_type = config_type;
                }
            }

            let trimmed = line.trim();
            if trimmed.len() > 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
                let section = trimmed[1..trimmed.len() - 1].trim().to_string();
                record
                    .settings
                    .entry(section.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                current_section = Some(section);
            } else if let Some((key, value)) = parse_registry_line(line) {
                insert_nested(&mut record.settings, &key, &value);
            } else if let Some(section) = &current_section {
                if let Some(eq) = line.find('=') {
                    let key = line[..eq].trim();
                    let value = line[eq + 1..].trim();
                    if !key.is_empty() && !value.is_empty() {
                        insert_into_section(&mut record.settings, section, key, value);
                    }
                }
            }

            if line.contains("successfully") {
                record.status = ConfigStatus::Applied;
                record.applied_at = Some(timestamp.unwrap_or_else(Utc::now));
            } else if line.contains("failed") || line.contains("ERROR:") {
                record.status = ConfigStatus::Failed;
                if let Some(pos) = line.find("ERROR: ") {
                    let message = line[pos + "ERROR: ".len()..].trim();
                    if !message.is_empty() {
                        record.error_message = Some(message.to_string());
                    }
                }
            }
        }

        Ok(Parsed::with_priority(
            vec![LogRecord::Configuration(record)],
            processing_priority(&content),
        ))
    }

    fn kind(&self) -> FileKind {
        FileKind::Configuration
    }
}

/// `Configuring <component> <settings|configuration|registry>`; the type
/// word is matched case-insensitively and the component is everything
/// between the verb and the first type word.
fn parse_config_header(line: &str) -> Option<(String, String)> {
    let pos = line.find("Configuring ")?;
    let rest = line[pos + "Configuring ".len()..].trim();

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let type_idx = tokens.iter().enumerate().skip(1).find_map(|(i, token)| {
        let lowered = token.to_lowercase();
        CONFIG_TYPES.contains(&lowered.as_str()).then_some(i)
    })?;

    Some((
        tokens[..type_idx].join(" "),
        tokens[type_idx].to_lowercase(),
    ))
}

fn parse_registry_line(line: &str) -> Option<(String, String)> {
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

/// Insert a value, nesting on `\` path separators.
fn insert_nested(settings: &mut Map<String, Value>, key: &str, value: &str) {
    if !key.contains('\\') {
        settings.insert(key.to_string(), Value::String(value.to_string()));
        return;
    }

    let parts: Vec<&str> = key.split('\\').collect();
    let mut current = settings;
    for part in &parts[..parts.len() - 1] {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => current = map,
            _ => return,
        }
    }
    if let Some(last) = parts.last() {
        current.insert(last.to_string(), Value::String(value.to_string()));
    }
}

fn insert_into_section(settings: &mut Map<String, Value>, section: &str, key: &str, value: &str) {
    let slot = settings
        .entry(section.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(map) = slot {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Security and network configuration outranks cosmetic settings.
fn processing_priority(content: &str) -> Priority {
    if content.contains("ERROR:") || content.contains("failed") {
        return Priority::High;
    }

    let lowered = content.to_lowercase();
    if ["security", "network", "firewall", "certificate"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        return Priority::High;
    }
    if ["ui", "display", "theme"].iter().any(|k| lowered.contains(k)) {
        return Priority::Low;
    }

    Priority::Medium
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ConfigurationRecord {
        let parsed = ConfigurationLogParser.parse(content.as_bytes()).unwrap();
        match parsed.records.into_iter().next() {
            Some(LogRecord::Configuration(record)) => record,
            other => panic!("expected configuration record, got {:?}", other),
        }
    }

    #[test]
    fn test_header_sets_component_and_type() {
        let record = parse("2024-01-01 09:00:00 INFO: Configuring BitLocker registry");
        assert_eq!(record.component, "BitLocker");
        assert_eq!(record.config_type, "registry");
    }

    #[test]
    fn test_nested_registry_settings() {
        let content = "\
2024-01-01 09:00:00 INFO: Configuring BitLocker registry
2024-01-01 09:00:01 INFO: Adding HKLM\\Software\\Policies\\Encryption=XtsAes256";
        let record = parse(content);
        let encryption = record
            .settings
            .get("HKLM")
            .and_then(|v| v.get("Software"))
            .and_then(|v| v.get("Policies"))
            .and_then(|v| v.get("Encryption"));
        assert_eq!(encryption, Some(&Value::String("XtsAes256".into())));
    }

    #[test]
    fn test_flat_registry_setting() {
        let record = parse("2024-01-01 09:00:01 INFO: Adding Timeout=30");
        assert_eq!(record.settings.get("Timeout"), Some(&Value::String("30".into())));
    }

    #[test]
    fn test_section_grouping() {
        let content = "\
[Proxy]
Server=proxy.corp.local
Port=8080";
        let record = parse(content);
        let proxy = record.settings.get("Proxy").and_then(Value::as_object).unwrap();
        assert_eq!(proxy.get("Server"), Some(&Value::String("proxy.corp.local".into())));
        assert_eq!(proxy.get("Port"), Some(&Value::String("8080".into())));
    }

    #[test]
    fn test_applied_status() {
        let content = "\
2024-01-01 09:00:00 INFO: Configuring Proxy settings
2024-01-01 09:00:05 INFO: Proxy configuration applied successfully";
        let record = parse(content);
        assert_eq!(record.status, ConfigStatus::Applied);
        assert!(record.applied_at.is_some());
    }

    #[test]
    fn test_failed_status_with_error() {
        let content = "\
2024-01-01 09:00:00 INFO: Configuring Proxy settings
2024-01-01 09:00:05 ERROR: registry key is locked";
        let record = parse(content);
        assert_eq!(record.status, ConfigStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("registry key is locked"));
    }

    #[test]
    fn test_no_header_still_yields_record() {
        let record = parse("just some noise");
        assert_eq!(record.status, ConfigStatus::Pending);
        assert!(record.component.is_empty());
    }

    #[test]
    fn test_priority_security_high() {
        let parsed = ConfigurationLogParser
            .parse(b"2024-01-01 09:00:00 INFO: Configuring Firewall settings")
            .unwrap();
        assert_eq!(parsed.priority, Some(Priority::High));
    }

    #[test]
    fn test_priority_theme_low() {
        let parsed = ConfigurationLogParser
            .parse(b"2024-01-01 09:00:00 INFO: Configuring Theme settings")
            .unwrap();
        assert_eq!(parsed.priority, Some(Priority::Low));
    }
}
