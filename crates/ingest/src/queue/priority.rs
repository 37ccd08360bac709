use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::parser::model::{FileKind, Priority};

use super::model::{ProcessingTask, QueueMetrics, QueuedCounts};

/// Per-tier scheduling policy: how many tasks one dispatch takes, and
/// the minimum spacing between successive dispatches of the tier.
#[derive(Debug, Clone, Copy)]
pub struct TierPolicy {
    pub batch_size: usize,
    pub interval: Duration,
}

struct Tier {
    tasks: Vec<ProcessingTask>,
    policy: TierPolicy,
    next_dispatch: Option<Instant>,
}

impl Tier {
    fn new(policy: TierPolicy) -> Self {
        Self { tasks: Vec::new(), policy, next_dispatch: None }
    }
}

/// Three-tier in-memory admission and scheduling structure.
///
/// Single-writer: the orchestrator's control loop is the only mutator,
/// so the queue itself needs no interior locking.
pub struct PriorityQueue {
    tiers: [Tier; 3],
    in_progress: HashSet<String>,
    completed: HashMap<String, bool>,
    errors: HashMap<String, String>,
    max_concurrent: usize,
}

/// Default dispatch policy: high immediately and one at a time, medium
/// in small batches every five minutes, low in larger batches every ten.
pub const DEFAULT_POLICIES: [TierPolicy; 3] = [
    TierPolicy { batch_size: 1, interval: Duration::ZERO },
    TierPolicy { batch_size: 5, interval: Duration::from_millis(300_000) },
    TierPolicy { batch_size: 10, interval: Duration::from_millis(600_000) },
];

impl PriorityQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_policies(max_concurrent, DEFAULT_POLICIES)
    }

    pub fn with_policies(max_concurrent: usize, policies: [TierPolicy; 3]) -> Self {
        Self {
            tiers: policies.map(Tier::new),
            in_progress: HashSet::new(),
            completed: HashMap::new(),
            errors: HashMap::new(),
            max_concurrent,
        }
    }

    /// Admit a task into its priority tier. Returns `false` when an
    /// already-queued task in the same tier has the same file and
    /// deployment.
    pub fn enqueue(&mut self, task: ProcessingTask) -> bool {
        let tier = &mut self.tiers[tier_index(task.priority)];

        let duplicate = tier.tasks.iter().any(|queued| {
            queued.file_path == task.file_path && queued.deployment_id == task.deployment_id
        });
        if duplicate {
            return false;
        }

        tier.tasks.push(task);
        optimize(&mut tier.tasks);
        true
    }

    /// Take the next batch to process, scanning tiers high to low.
    ///
    /// Empty when the in-progress count is at the concurrency limit,
    /// when every non-empty tier is still inside its dispatch interval,
    /// or when nothing is queued. Every returned task has been marked
    /// in-progress; the caller owes each one a `complete_task`.
    pub fn dequeue_batch(&mut self, now: Instant) -> Vec<ProcessingTask> {
        if self.in_progress.len() >= self.max_concurrent {
            return Vec::new();
        }
        let slots = self.max_concurrent - self.in_progress.len();

        for index in 0..self.tiers.len() {
            let tier = &mut self.tiers[index];
            if tier.tasks.is_empty() {
                continue;
            }
            if let Some(next) = tier.next_dispatch {
                if now < next {
                    continue;
                }
            }

            let take = tier.policy.batch_size.min(slots).min(tier.tasks.len());
            let batch: Vec<ProcessingTask> = tier.tasks.drain(..take).collect();
            if !tier.policy.interval.is_zero() {
                tier.next_dispatch = Some(now + tier.policy.interval);
            }

            for task in &batch {
                self.in_progress.insert(task.id.clone());
            }
            return batch;
        }

        Vec::new()
    }

    /// Record a task's terminal outcome. Idempotent: only the first call
    /// for a task id counts.
    pub fn complete_task(&mut self, task_id: &str, success: bool, error: Option<String>) {
        if self.completed.contains_key(task_id) {
            return;
        }
        self.in_progress.remove(task_id);
        self.completed.insert(task_id.to_string(), success);
        if let Some(message) = error {
            self.errors.insert(task_id.to_string(), message);
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            queued: QueuedCounts {
                high: self.tiers[0].tasks.len(),
                medium: self.tiers[1].tasks.len(),
                low: self.tiers[2].tasks.len(),
            },
            in_progress: self.in_progress.len(),
            completed: self.completed.len(),
            errors: self.errors.len(),
            success: self.completed.values().filter(|ok| **ok).count(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_progress.is_empty() && self.tiers.iter().all(|tier| tier.tasks.is_empty())
    }
}

fn tier_index(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

/// Re-order a tier after admission: smaller files first, newer tasks
/// before older at equal size, then tasks sharing (file kind,
/// deployment) pulled together so one dispatch stays on one parser and
/// one deployment's files.
fn optimize(tasks: &mut Vec<ProcessingTask>) {
    tasks.sort_by(|a, b| {
        a.file_size
            .cmp(&b.file_size)
            .then(b.created_at.cmp(&a.created_at))
    });

    let mut order: Vec<(FileKind, String)> = Vec::new();
    let mut groups: HashMap<(FileKind, String), Vec<ProcessingTask>> = HashMap::new();
    for task in tasks.drain(..) {
        let key = (task.file_kind, task.deployment_id.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(task);
    }
    for key in &order {
        if let Some(group) = groups.remove(key) {
            tasks.extend(group);
        }
    }
}
