//! Model — PipelineConfig and related structs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::handler::RetryPolicy;
use crate::queue::priority::TierPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum tasks in flight at once
    pub max_concurrent: usize,
    /// Control-loop cadence
    pub tick_interval_ms: u64,
    /// Inputs at or above this size go through the chunk engine
    pub chunk_size_bytes: usize,
    /// Chunk-parse worker pool size
    pub worker_count: usize,
    pub retry: RetryConfig,
    pub queue: QueueTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueTuning {
    pub high_batch: usize,
    pub medium_batch: usize,
    pub low_batch: usize,
    pub high_interval_ms: u64,
    pub medium_interval_ms: u64,
    pub low_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            tick_interval_ms: 100,
            chunk_size_bytes: 1024 * 1024,
            worker_count: 4,
            retry: RetryConfig::default(),
            queue: QueueTuning::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            high_batch: 1,
            medium_batch: 5,
            low_batch: 10,
            high_interval_ms: 0,
            medium_interval_ms: 300_000,
            low_interval_ms: 600_000,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be > 0".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be > 0".to_string());
        }
        if self.chunk_size_bytes == 0 {
            return Err("chunk_size_bytes must be > 0".to_string());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be > 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        if self.queue.high_batch == 0 || self.queue.medium_batch == 0 || self.queue.low_batch == 0
        {
            return Err("queue batch sizes must be > 0".to_string());
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    /// Tier policies in high → medium → low order.
    pub fn tier_policies(&self) -> [TierPolicy; 3] {
        [
            TierPolicy {
                batch_size: self.queue.high_batch,
                interval: Duration::from_millis(self.queue.high_interval_ms),
            },
            TierPolicy {
                batch_size: self.queue.medium_batch,
                interval: Duration::from_millis(self.queue.medium_interval_ms),
            },
            TierPolicy {
                batch_size: self.queue.low_batch,
                interval: Duration::from_millis(self.queue.low_interval_ms),
            },
        ]
    }
}
