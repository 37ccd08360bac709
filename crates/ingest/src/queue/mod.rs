//! Priority processing queue: three tiers, deduplication, locality
//! re-ordering, and per-tier batch/interval dispatch policy.

pub mod model;
pub mod priority;

pub use model::{ProcessingTask, QueueMetrics, QueuedCounts, TaskStatus};
pub use priority::{PriorityQueue, TierPolicy, DEFAULT_POLICIES};
