//! External persistence boundary.
//!
//! The pipeline never talks to a database directly; everything goes
//! through the [`LogStore`] trait. `memory.rs` provides the in-memory
//! test double.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::LogStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store rejected write: {0}")]
    Rejected(String),
}
