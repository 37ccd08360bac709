//! Failure taxonomy and the error-handling layer.

pub mod handler;

pub use handler::{ErrorCategory, ErrorContext, ErrorCorrelation, ErrorHandler, RetryPolicy};

use thiserror::Error;

use crate::parser::model::ParseError;
use crate::store::StoreError;

/// Every failure the pipeline can surface. Parsers and the store return
/// their own error types; this is the orchestration-level roll-up.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outer failure after retry exhaustion, distinct from the
    /// underlying operation's own error.
    #[error("Operation failed after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
