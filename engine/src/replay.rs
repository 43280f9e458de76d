//! Replay planning for the outbox drain.
//!
//! This module decides *what* the drain does and in which order; the client
//! crate performs the remote calls.
//!
//! # Algorithm
//!
//! 1. Sort all queued entries by `(timestamp, op_id)`
//! 2. Skip entries still inside their backoff window
//! 3. Once an entry for a task is left queued, hold later entries for the
//!    same task until the next cycle
//! 4. Rejected entries consume a retry budget and end up as dead letters

use crate::{ClientId, OperationId, OutboxOperation, ServerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Retry budget for operations the remote API rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Rejections tolerated before an entry is dead-lettered
    pub max_attempts: u32,
    /// Delay after the first rejection, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound of the delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff after `attempts` rejections (exponential, capped).
    pub fn delay_after(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let shift = (attempts - 1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms)
    }

    /// When an entry rejected `attempts` times at `now` may be retried.
    pub fn next_attempt_at(&self, now: Timestamp, attempts: u32) -> Timestamp {
        now.saturating_add(self.delay_after(attempts))
    }

    /// Whether `attempts` rejections use up the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// An outbox entry together with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOp {
    pub operation: OutboxOperation,
    /// Rejections so far
    pub attempts: u32,
    /// Not retried before this time
    pub next_attempt_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Claimed by an immediate-apply attempt
    pub in_flight: bool,
}

impl QueuedOp {
    /// A freshly enqueued entry.
    pub fn new(operation: OutboxOperation) -> Self {
        Self {
            operation,
            attempts: 0,
            next_attempt_at: 0,
            last_error: None,
            in_flight: false,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_attempt_at <= now
    }
}

/// Sort entries into replay order.
pub fn replay_order(mut entries: Vec<QueuedOp>) -> Vec<QueuedOp> {
    entries.sort_by(|a, b| a.operation.cmp(&b.operation));
    entries
}

/// Per-task ordering barrier for one drain.
///
/// Independent tasks keep flowing; a task with an entry left behind is
/// closed for the rest of the cycle.
#[derive(Debug, Default)]
pub struct TaskBarrier {
    held: HashSet<String>,
}

impl TaskBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation may run in this cycle.
    pub fn admits(&self, op: &OutboxOperation) -> bool {
        match op.task_key() {
            Some(key) => !self.held.contains(key),
            None => true,
        }
    }

    /// Close the task of an operation that was left queued.
    pub fn hold(&mut self, op: &OutboxOperation) {
        if let Some(key) = op.task_key() {
            self.held.insert(key.to_string());
        }
    }
}

/// Outcome of one entry during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum OpOutcome {
    /// Confirmed remotely and removed
    Applied,
    /// Removed without effect: already achieved or unsatisfiable
    Dropped,
    /// Left queued after a failure
    Retained { reason: String },
    /// Still inside its backoff window
    Deferred,
    /// Held behind an earlier entry for the same task
    Blocked,
    /// Retry budget exhausted
    DeadLettered { reason: String },
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub applied: Vec<OperationId>,
    pub dropped: Vec<OperationId>,
    pub retained: Vec<OperationId>,
    pub deferred: Vec<OperationId>,
    pub blocked: Vec<OperationId>,
    pub dead_lettered: Vec<OperationId>,
    /// Local-only tasks uploaded outside the outbox
    pub uploaded: Vec<ClientId>,
    /// Remote tasks first seen by this client
    pub adopted: Vec<ServerId>,
    /// Whether the local snapshot was rebuilt from the remote listing
    pub reloaded: bool,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one entry.
    pub fn record(&mut self, op_id: &OperationId, outcome: &OpOutcome) {
        let bucket = match outcome {
            OpOutcome::Applied => &mut self.applied,
            OpOutcome::Dropped => &mut self.dropped,
            OpOutcome::Retained { .. } => &mut self.retained,
            OpOutcome::Deferred => &mut self.deferred,
            OpOutcome::Blocked => &mut self.blocked,
            OpOutcome::DeadLettered { .. } => &mut self.dead_lettered,
        };
        bucket.push(op_id.clone());
    }

    /// Entries still in the outbox after this cycle.
    pub fn still_queued(&self) -> usize {
        self.retained.len() + self.deferred.len() + self.blocked.len()
    }
}
