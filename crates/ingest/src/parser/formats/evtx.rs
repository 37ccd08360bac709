use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::parser::model::{EventRecord, LogRecord, Parsed, ParseError, ParseResult};
use crate::parser::traits::{FileKind, LogFileParser};

/// 8-byte magic at offset 0 of an event-log container.
pub const EVTX_MAGIC: [u8; 8] = *b"ElfFile\0";

/// Bytes reserved for the file header.
pub const FILE_HEADER_LEN: usize = 0x1000;

/// Chunk header: u32 chunk size at offset 4; the size includes the
/// header itself.
pub const CHUNK_HEADER_LEN: usize = 0x200;

/// Event header inside a chunk: u32 event size at offset 4, size
/// including the header.
pub const EVENT_HEADER_LEN: usize = 24;

/// Parser for binary event-log containers (simplified EVTX).
///
/// The file is a header followed by self-delimiting chunks; each chunk
/// holds variable-size event records. Malformed individual records are
/// skipped; only a bad magic fails the parse.
pub struct EventLogBinaryParser;

impl LogFileParser for EventLogBinaryParser {
    fn parse(&self, raw: &[u8]) -> ParseResult {
        if !has_magic(raw) {
            return Err(ParseError::InvalidFormat("Invalid EVTX file format".into()));
        }
        Ok(Parsed::new(decode_chunks(&raw[FILE_HEADER_LEN.min(raw.len())..])))
    }

    fn kind(&self) -> FileKind {
        FileKind::Event
    }
}

pub fn has_magic(raw: &[u8]) -> bool {
    raw.len() >= EVTX_MAGIC.len() && raw[..EVTX_MAGIC.len()] == EVTX_MAGIC
}

/// Decode a stream of chunks (no file header). Also the worker entry
/// point for chunk-aligned splits.
pub fn decode_chunks(data: &[u8]) -> Vec<LogRecord> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + CHUNK_HEADER_LEN <= data.len() {
        let chunk_size = read_u32(data, offset + 4) as usize;
        if chunk_size == 0 {
            break;
        }

        if chunk_size > CHUNK_HEADER_LEN {
            let end = (offset + chunk_size).min(data.len());
            records.extend(decode_chunk_events(&data[offset + CHUNK_HEADER_LEN..end]));
        }

        offset += chunk_size;
    }

    records
}

/// Walk chunk sizes to find where each chunk starts. Used by the chunk
/// engine to place split points on chunk boundaries.
pub fn chunk_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut offset = 0;

    while offset + CHUNK_HEADER_LEN <= data.len() {
        let chunk_size = read_u32(data, offset + 4) as usize;
        if chunk_size == 0 {
            break;
        }
        offsets.push(offset);
        offset += chunk_size;
    }

    offsets
}

fn decode_chunk_events(chunk: &[u8]) -> Vec<LogRecord> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + EVENT_HEADER_LEN <= chunk.len() {
        let event_size = read_u32(chunk, offset + 4) as usize;
        if event_size <= EVENT_HEADER_LEN {
            break;
        }

        let end = (offset + event_size).min(chunk.len());
        if let Some(record) = decode_event(&chunk[offset + EVENT_HEADER_LEN..end]) {
            records.push(LogRecord::Event(record));
        }

        offset += event_size;
    }

    records
}

/// Event payload: timestamp i64 ms @0, event id u32 @8, level u16 @12,
/// then at @24 the UTF-16LE message terminated by a double-zero
/// sentinel, followed by the computer and channel strings read the same
/// way.
fn decode_event(payload: &[u8]) -> Option<EventRecord> {
    if payload.len() < 14 {
        return None;
    }

    let millis = i64::from_le_bytes(payload[0..8].try_into().ok()?);
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)?;
    let event_id = u32::from_le_bytes(payload[8..12].try_into().ok()?);
    let level = u16::from_le_bytes(payload[12..14].try_into().ok()?);

    let strings = payload.get(24..).unwrap_or(&[]);
    let (message, after_message) = utf16le_until_nul(strings);
    let (computer, after_computer) = utf16le_until_nul(&strings[after_message..]);
    let (channel, _) = utf16le_until_nul(&strings[after_computer + after_message..]);

    let mut metadata = HashMap::new();
    if !computer.is_empty() {
        metadata.insert("computer".to_string(), computer);
    }

    Some(EventRecord {
        event_id,
        provider: String::new(),
        channel,
        level: level_name(level).to_string(),
        timestamp,
        message,
        task_category: None,
        keywords: None,
        metadata,
    })
}

/// Decode little-endian UTF-16 code units until a 0x0000 unit or the end
/// of the buffer. Returns the decoded string and the byte offset just
/// past the terminator (or the end of the buffer).
fn utf16le_until_nul(data: &[u8]) -> (String, usize) {
    let mut units = Vec::new();
    let mut offset = 0;

    while offset + 2 <= data.len() {
        let unit = u16::from_le_bytes([data[offset], data[offset + 1]]);
        offset += 2;
        if unit == 0 {
            return (String::from_utf16_lossy(&units), offset);
        }
        units.push(unit);
    }

    (String::from_utf16_lossy(&units), data.len())
}

fn level_name(level: u16) -> &'static str {
    match level {
        1 => "critical",
        2 => "error",
        3 => "warning",
        4 => "info",
        5 => "verbose",
        _ => "unknown",
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    match data.get(offset..offset + 4).and_then(|b| b.try_into().ok()) {
        Some(bytes) => u32::from_le_bytes(bytes),
        None => 0,
    }
}
