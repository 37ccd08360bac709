//! Chunked parallel parsing.
//!
//! Large binary inputs are split into record-aligned chunks and fanned
//! out over a bounded worker pool; everything else parses synchronously.
//! Workers are pure functions over (chunk, decode task) and communicate
//! only by message passing; they never touch the queue or the store.
//!
//! Split points always fall on record boundaries: the trace format is
//! split on its length-prefixed record offsets, the event-log container
//! on its self-delimiting chunk offsets, after validating the file
//! header once up front. Document-oriented text formats (installation,
//! configuration, generic event) produce a single record from stateful
//! whole-file scans and are never chunked.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::parser::detector::ParserKind;
use crate::parser::formats::{self, etl, evtx};
use crate::parser::model::{Parsed, ParseError, ParseResult};

/// Inputs at or above this size are parsed in parallel.
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

pub const DEFAULT_WORKERS: usize = 4;

/// The decode a worker runs over one chunk. Header validation already
/// happened, so these operate on headerless record streams.
#[derive(Debug, Clone, Copy)]
enum ChunkTask {
    TraceRecords,
    EventLogChunks,
}

struct ChunkJob {
    chunk: Bytes,
    task: ChunkTask,
    reply: oneshot::Sender<ParseResult>,
}

/// Bounded worker pool for chunk parsing.
///
/// Must be created inside a tokio runtime; the workers are spawned
/// tasks fed over an mpsc channel. Dropping the engine closes the
/// channel and the workers exit.
pub struct ChunkEngine {
    tx: mpsc::Sender<ChunkJob>,
    chunk_size: usize,
}

impl ChunkEngine {
    pub fn new(workers: usize, chunk_size: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<ChunkJob>(workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let job = match job {
                        Some(job) => job,
                        None => break,
                    };
                    let result = run_chunk(job.task, &job.chunk);
                    // The requester may have gone away; nothing to do.
                    let _ = job.reply.send(result);
                }
                debug!(worker, "chunk worker stopped");
            });
        }

        Self { tx, chunk_size }
    }

    /// Parse a whole input with the given parser, chunking when the
    /// input is large and the format supports record-aligned splits.
    pub async fn parse(&self, parser: ParserKind, data: Bytes) -> ParseResult {
        if data.len() < self.chunk_size {
            return formats::run_parser(parser, &data);
        }

        match parser {
            ParserKind::Trace => {
                if !etl::has_magic(&data) {
                    return Err(ParseError::InvalidFormat("Invalid ETL file format".into()));
                }
                if data.len() <= etl::FILE_HEADER_LEN {
                    return Ok(Parsed::default());
                }
                let body = data.slice(etl::FILE_HEADER_LEN..);
                let offsets = etl::record_offsets(&body);
                let chunks = aligned_chunks(&body, &offsets, self.chunk_size);
                self.fan_out(ChunkTask::TraceRecords, chunks).await
            }
            ParserKind::EventLog => {
                if !evtx::has_magic(&data) {
                    return Err(ParseError::InvalidFormat("Invalid EVTX file format".into()));
                }
                if data.len() <= evtx::FILE_HEADER_LEN {
                    return Ok(Parsed::default());
                }
                let body = data.slice(evtx::FILE_HEADER_LEN..);
                let offsets = evtx::chunk_offsets(&body);
                let chunks = aligned_chunks(&body, &offsets, self.chunk_size);
                self.fan_out(ChunkTask::EventLogChunks, chunks).await
            }
            // Document-oriented formats yield one record per file and
            // cannot be split; archives are a single notice.
            _ => formats::run_parser(parser, &data),
        }
    }

    async fn fan_out(&self, task: ChunkTask, chunks: Vec<Bytes>) -> ParseResult {
        let mut replies = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let (reply_tx, reply_rx) = oneshot::channel();
            let job = ChunkJob { chunk, task, reply: reply_tx };
            if self.tx.send(job).await.is_err() {
                return Err(ParseError::ChunkFailures("worker pool is shut down".into()));
            }
            replies.push(reply_rx);
        }

        merge(join_all(replies).await)
    }
}

fn run_chunk(task: ChunkTask, chunk: &[u8]) -> ParseResult {
    match task {
        ChunkTask::TraceRecords => Ok(Parsed::new(etl::decode_records(chunk))),
        ChunkTask::EventLogChunks => Ok(Parsed::new(evtx::decode_chunks(chunk))),
    }
}

/// Cut `data` into chunks of roughly `chunk_size`, only ever at the
/// given record offsets. The last chunk carries any trailing bytes.
fn aligned_chunks(data: &Bytes, offsets: &[usize], chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut start = 0usize;

    for &offset in offsets {
        if offset > start && offset - start >= chunk_size {
            chunks.push(data.slice(start..offset));
            start = offset;
        }
    }
    if start < data.len() {
        chunks.push(data.slice(start..));
    }
    if chunks.is_empty() {
        chunks.push(data.clone());
    }

    chunks
}

/// Concatenate chunk records in order; any chunk failure fails the
/// merged result with all chunk errors joined.
fn merge(results: Vec<Result<ParseResult, oneshot::error::RecvError>>) -> ParseResult {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(Ok(parsed)) => records.extend(parsed.records),
            Ok(Err(error)) => errors.push(error.to_string()),
            Err(_) => errors.push("chunk worker dropped before replying".to_string()),
        }
    }

    if errors.is_empty() {
        Ok(Parsed::new(records))
    } else {
        Err(ParseError::ChunkFailures(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::formats::etl::testutil as etl_util;
    use crate::parser::formats::evtx::testutil as evtx_util;
    use crate::parser::model::LogRecord;
    use crate::parser::traits::LogFileParser;
    use chrono::{TimeZone, Utc};

    fn trace_file(count: usize) -> Vec<u8> {
        let ts = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        let records: Vec<Vec<u8>> = (0..count)
            .map(|i| etl_util::build_record(ts, 0x0008, 100, 200, &format!("trace event {i}")))
            .collect();
        etl_util::build_file(&records)
    }

    fn trace_messages(parsed: &Parsed) -> Vec<String> {
        parsed
            .records
            .iter()
            .map(|record| match record {
                LogRecord::Trace(t) => t.message.clone(),
                other => panic!("expected trace record, got {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_small_input_parses_synchronously() {
        let engine = ChunkEngine::new(2, CHUNK_SIZE);
        let file = trace_file(3);
        let parsed = engine
            .parse(ParserKind::Trace, Bytes::from(file))
            .await
            .unwrap();
        assert_eq!(parsed.records.len(), 3);
    }

    #[tokio::test]
    async fn test_chunked_trace_matches_direct_parse() {
        // A tiny chunk size forces many chunks without huge fixtures.
        let engine = ChunkEngine::new(3, 256);
        let file = trace_file(40);

        let direct = crate::parser::formats::TraceLogParser.parse(&file).unwrap();
        let chunked = engine
            .parse(ParserKind::Trace, Bytes::from(file))
            .await
            .unwrap();

        assert_eq!(trace_messages(&chunked), trace_messages(&direct));
        assert_eq!(chunked.records.len(), 40);
    }

    #[tokio::test]
    async fn test_chunked_event_log_matches_direct_parse() {
        let engine = ChunkEngine::new(3, 1024);
        let chunks: Vec<Vec<u8>> = (0..12i64)
            .map(|i| {
                evtx_util::build_chunk(&[evtx_util::build_event(
                    1_704_100_000_000 + i,
                    1000 + i as u32,
                    4,
                    &format!("event {i}"),
                    "HOST",
                    "System",
                )])
            })
            .collect();
        let file = evtx_util::build_file(&chunks);

        let direct = crate::parser::formats::EventLogBinaryParser.parse(&file).unwrap();
        let chunked = engine
            .parse(ParserKind::EventLog, Bytes::from(file))
            .await
            .unwrap();

        assert_eq!(chunked.records.len(), direct.records.len());
        assert_eq!(chunked.records.len(), 12);
    }

    #[tokio::test]
    async fn test_large_input_with_bad_magic_fails() {
        let engine = ChunkEngine::new(2, 64);
        let junk = Bytes::from(vec![0u8; 4096]);
        let result = engine.parse(ParserKind::Trace, junk).await;
        assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn test_text_formats_never_chunk() {
        // Chunk size of 1 would shred a text file; the installation
        // parser must still see the whole document.
        let engine = ChunkEngine::new(2, 1);
        let content = "2024-01-01 10:00:00 INFO: Installing FooApp 1.2.3.4\n\
                       2024-01-01 10:05:00 INFO: Installation successful";
        let parsed = engine
            .parse(ParserKind::Installation, Bytes::from(content.as_bytes().to_vec()))
            .await
            .unwrap();
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_aligned_chunks_cut_only_on_offsets() {
        let data = Bytes::from(vec![0u8; 100]);
        let offsets = vec![0, 30, 60, 90];
        let chunks = aligned_chunks(&data, &offsets, 50);

        let lengths: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, vec![60, 40]);
    }

    #[test]
    fn test_aligned_chunks_without_offsets_is_one_chunk() {
        let data = Bytes::from(vec![0u8; 100]);
        let chunks = aligned_chunks(&data, &[], 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 100);
    }
}
