//! # tasksync engine
//!
//! Deterministic rules for an offline-first task client.
//!
//! This crate holds the parts of offline synchronization that do not touch
//! IO: the task model and its wire normalization, the outbox operation log,
//! the client-to-server identity rules, replay ordering with a retry budget,
//! and the snapshot merge that follows a drain.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, network, or database; the client crate does that
//! - **Deterministic**: same inputs, same outputs
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Tasks
//!
//! A [`Task`] is created locally with `id == client_id`. Once the server
//! accepts it, the snapshot entry takes the server id while `client_id`
//! stays as it was.
//!
//! ### Outbox
//!
//! Every user mutation appends one [`OutboxOperation`]:
//! - [`CreateOp`] - POST a new task
//! - [`UpdateOp`] - PUT a [`TaskPatch`]
//! - [`DeleteOp`] - DELETE a task
//!
//! Operations replay in `(timestamp, op_id)` order. Timestamps come from a
//! [`MonotonicClock`].
//!
//! ### Identity mapping
//!
//! [`IdentityMap`] and [`check_mapping`] enforce first-write-wins: a client
//! id resolves to at most one server id, ever.
//!
//! ### Replay
//!
//! [`replay_order`], [`TaskBarrier`] and [`RetryPolicy`] drive the drain;
//! [`SyncReport`] collects what happened.
//!
//! ## Quick Start
//!
//! ```rust
//! use tasksync_engine::{
//!     replay_order, CreateOp, OutboxOperation, QueuedOp, TaskPatch, TaskPayload, TaskStatus,
//!     UpdateOp,
//! };
//!
//! let create = OutboxOperation::Create(CreateOp::new(
//!     "op-1",
//!     "client-1",
//!     TaskPayload {
//!         title: "Buy milk".into(),
//!         description: "2 litres".into(),
//!         status: TaskStatus::Pending,
//!     },
//!     1706745600000,
//! ));
//! let update = OutboxOperation::Update(UpdateOp::new(
//!     "op-2",
//!     "client-1",
//!     None,
//!     TaskPatch::status(TaskStatus::Done),
//!     1706745600001,
//! ));
//!
//! // Insertion order does not matter, timestamps do.
//! let ordered = replay_order(vec![QueuedOp::new(update), QueuedOp::new(create)]);
//! assert_eq!(ordered[0].operation.op_id(), "op-1");
//! ```

pub mod clock;
pub mod error;
pub mod mapping;
pub mod normalize;
pub mod operation;
pub mod replay;
pub mod snapshot;
pub mod task;

// Re-export main types at crate root
pub use clock::{wall_clock_millis, MonotonicClock};
pub use error::Error;
pub use mapping::{check_mapping, IdentityMap, Resolution};
pub use normalize::{normalize_task, parse_task_listing, validate_text};
pub use operation::{CreateOp, DeleteOp, OperationKind, OutboxOperation, UpdateOp};
pub use replay::{replay_order, OpOutcome, QueuedOp, RetryPolicy, SyncReport, TaskBarrier};
pub use snapshot::{merge_remote_listing, MergedSnapshot};
pub use task::{Task, TaskPatch, TaskPayload, TaskStats, TaskStatus};

/// Type aliases for clarity
pub type ClientId = String;
pub type ServerId = String;
pub type TaskId = String;
pub type OperationId = String;
pub type Timestamp = u64;
