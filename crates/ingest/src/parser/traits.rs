pub use super::model::{FileKind, LogRecord, Parsed, ParseError, ParseResult, Priority};

/// A format-aware log file parser.
///
/// Parsers are pure and stateless: bytes in, structured records out, no
/// I/O. Implementations must be `Send + Sync` so the chunk engine can
/// invoke them from worker tasks.
pub trait LogFileParser: Send + Sync {
    /// Parse raw file content into structured records plus a priority
    /// hint. Format-level failures return `Err` with no partial records;
    /// malformed individual records inside a valid file are skipped.
    fn parse(&self, raw: &[u8]) -> ParseResult;

    /// The file kind this parser handles.
    fn kind(&self) -> FileKind;
}
