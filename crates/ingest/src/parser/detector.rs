//! Format detection: a byte-signature check at parse time and a
//! filename-convention check at task-creation time. Both exist so they
//! can be cross-checked; when they disagree the byte signature wins.

use tracing::warn;

use crate::parser::formats::{etl, evtx};
use crate::parser::model::{FileKind, ParseError};

/// ZIP-family signature, shared by .zip, .cab, .appx containers.
pub const ARCHIVE_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// The concrete parser to run over a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Installation,
    Configuration,
    EventText,
    Trace,
    EventLog,
    Archive,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Installation => "installation",
            ParserKind::Configuration => "configuration",
            ParserKind::EventText => "event_text",
            ParserKind::Trace => "trace",
            ParserKind::EventLog => "event_log",
            ParserKind::Archive => "archive",
        }
    }
}

/// Inspect the leading bytes for a known binary signature. `None` means
/// the buffer should be attempted as text.
pub fn sniff(content: &[u8]) -> Option<ParserKind> {
    if etl::has_magic(content) {
        return Some(ParserKind::Trace);
    }
    if evtx::has_magic(content) {
        return Some(ParserKind::EventLog);
    }
    if content.len() >= ARCHIVE_MAGIC.len() && content[..ARCHIVE_MAGIC.len()] == ARCHIVE_MAGIC {
        return Some(ParserKind::Archive);
    }
    None
}

/// Classify a file by name when its task is created. Independent of the
/// byte-signature check performed later at parse time.
pub fn kind_for_filename(name: &str) -> FileKind {
    let lowered = name.to_lowercase();
    if lowered.ends_with(".evtx") {
        return FileKind::Event;
    }
    if lowered.ends_with(".etl") {
        return FileKind::Trace;
    }
    if name.starts_with("Install_") {
        return FileKind::Installation;
    }
    FileKind::Configuration
}

/// Pick the parser for a buffer, given the kind the task was created
/// with. A binary signature overrides the declared kind; text content is
/// routed by the declared kind, falling back to the generic event parser
/// for content that claimed to be binary.
pub fn resolve(declared: FileKind, content: &[u8]) -> Result<ParserKind, ParseError> {
    if let Some(detected) = sniff(content) {
        if !agrees(declared, detected) {
            warn!(
                declared = declared.as_str(),
                detected = detected.as_str(),
                "file kind disagrees with byte signature; using signature"
            );
        }
        return Ok(detected);
    }

    match declared {
        FileKind::Installation => Ok(ParserKind::Installation),
        FileKind::Configuration => Ok(ParserKind::Configuration),
        FileKind::Event => Ok(ParserKind::EventText),
        FileKind::Trace => {
            warn!("trace task carries no binary trace signature; parsing as generic event text");
            Ok(ParserKind::EventText)
        }
        FileKind::General => Err(ParseError::UnsupportedKind("general".into())),
    }
}

fn agrees(declared: FileKind, detected: ParserKind) -> bool {
    matches!(
        (declared, detected),
        (FileKind::Trace, ParserKind::Trace) | (FileKind::Event, ParserKind::EventLog)
    )
}
