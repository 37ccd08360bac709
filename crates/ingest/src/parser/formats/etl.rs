use std::collections::HashMap;

use crate::parser::model::{LogLevel, LogRecord, Parsed, ParseError, ParseResult, TraceRecord};
use crate::parser::timestamp::filetime_to_utc;
use crate::parser::traits::{FileKind, LogFileParser};

/// 4-byte magic at offset 0 of a trace file.
pub const ETL_MAGIC: [u8; 4] = *b"LEVT";

/// Bytes reserved for the file header.
pub const FILE_HEADER_LEN: usize = 0x20;

/// Fixed record header: u32 record size at offset 4; the size includes
/// the header itself.
pub const RECORD_HEADER_LEN: usize = 16;

/// Parser for binary trace logs (simplified ETL).
///
/// The file is a header followed by variable-size records. Each record
/// payload carries a FILETIME timestamp, an event-type bitmask, process
/// and thread ids, and a string/property table the message is assembled
/// from. A corrupt record is skipped; only a bad magic fails the parse.
pub struct TraceLogParser;

impl LogFileParser for TraceLogParser {
    fn parse(&self, raw: &[u8]) -> ParseResult {
        if !has_magic(raw) {
            return Err(ParseError::InvalidFormat("Invalid ETL file format".into()));
        }
        Ok(Parsed::new(decode_records(&raw[FILE_HEADER_LEN.min(raw.len())..])))
    }

    fn kind(&self) -> FileKind {
        FileKind::Trace
    }
}

pub fn has_magic(raw: &[u8]) -> bool {
    raw.len() >= ETL_MAGIC.len() && raw[..ETL_MAGIC.len()] == ETL_MAGIC
}

/// Decode a stream of trace records (no file header). Also the worker
/// entry point for record-aligned chunks.
pub fn decode_records(data: &[u8]) -> Vec<LogRecord> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + RECORD_HEADER_LEN <= data.len() {
        let record_size = read_u32(data, offset + 4) as usize;
        if record_size == 0 {
            break;
        }

        let payload_end = (offset + record_size).min(data.len());
        if record_size > RECORD_HEADER_LEN {
            let payload = &data[offset + RECORD_HEADER_LEN..payload_end];
            if let Some(record) = decode_record(payload) {
                records.push(LogRecord::Trace(record));
            }
        }

        offset += record_size;
    }

    records
}

/// Walk record sizes to find where each record starts. Used by the chunk
/// engine to place split points on record boundaries.
pub fn record_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut offset = 0;

    while offset + RECORD_HEADER_LEN <= data.len() {
        let record_size = read_u32(data, offset + 4) as usize;
        if record_size == 0 {
            break;
        }
        offsets.push(offset);
        offset += record_size;
    }

    offsets
}

/// Record payload layout: FILETIME i64 @0, event-type bitmask u16 @8,
/// process id u32 @12, thread id u32 @16, property data @24.
fn decode_record(payload: &[u8]) -> Option<TraceRecord> {
    if payload.len() < 20 {
        return None;
    }

    let filetime = i64::from_le_bytes(payload[0..8].try_into().ok()?);
    let timestamp = filetime_to_utc(filetime)?;
    let event_type = u16::from_le_bytes(payload[8..10].try_into().ok()?);
    let process_id = read_u32(payload, 12);
    let thread_id = read_u32(payload, 16);

    let (message, metadata) = if payload.len() > 24 {
        decode_properties(&payload[24..])
    } else {
        (String::new(), HashMap::new())
    };

    Some(TraceRecord {
        timestamp,
        level: event_level(event_type),
        message,
        process_id,
        thread_id,
        metadata,
    })
}

/// First matching bit wins.
fn event_level(event_type: u16) -> LogLevel {
    if event_type & 0x0001 != 0 {
        LogLevel::Critical
    } else if event_type & 0x0002 != 0 {
        LogLevel::Error
    } else if event_type & 0x0004 != 0 {
        LogLevel::Warning
    } else if event_type & 0x0008 != 0 {
        LogLevel::Info
    } else if event_type & 0x0010 != 0 {
        LogLevel::Verbose
    } else {
        LogLevel::Unknown
    }
}

/// Property data: a string table (u16 count, then u16-length-prefixed
/// UTF-16LE strings), then a property table of (name index, value index)
/// u16 pairs. The message is the strings left over after the property
/// pairs, joined with spaces.
fn decode_properties(data: &[u8]) -> (String, HashMap<String, String>) {
    match try_decode_properties(data) {
        Some(decoded) => decoded,
        None => ("Failed to parse event data".to_string(), HashMap::new()),
    }
}

fn try_decode_properties(data: &[u8]) -> Option<(String, HashMap<String, String>)> {
    let mut offset = 0;

    let string_count = read_u16(data, &mut offset)? as usize;
    let mut strings = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        let length = read_u16(data, &mut offset)? as usize;
        let end = offset.checked_add(length)?;
        if end > data.len() {
            return None;
        }
        strings.push(decode_utf16le(&data[offset..end]));
        offset = end;
    }

    let property_count = read_u16(data, &mut offset)? as usize;
    let mut metadata = HashMap::new();
    for _ in 0..property_count {
        let name_idx = read_u16(data, &mut offset)? as usize;
        let value_idx = read_u16(data, &mut offset)? as usize;
        if name_idx < strings.len() && value_idx < strings.len() {
            metadata.insert(strings[name_idx].clone(), strings[value_idx].clone());
        }
    }

    let message = strings
        .get(property_count * 2..)
        .unwrap_or(&[])
        .join(" ")
        .trim()
        .to_string();

    Some((message, metadata))
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    match data.get(offset..offset + 4).and_then(|b| b.try_into().ok()) {
        Some(bytes) => u32::from_le_bytes(bytes),
        None => 0,
    }
}

fn read_u16(data: &[u8], offset: &mut usize) -> Option<u16> {
    let bytes = data.get(*offset..*offset + 2)?;
    *offset += 2;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
