//! Task repository: the write path used by application code.
//!
//! Every mutation commits the local snapshot change and its outbox entry in
//! one transaction before anything goes over the network. The immediate
//! remote attempt that follows only ever removes that entry, so dropping the
//! returned future at any point leaves the mutation queued for the next sync
//! cycle.

use crate::connectivity::Connectivity;
use crate::db::{self, DeadLetter, LocalStore};
use crate::error::{Error, Result};
use crate::identity;
use crate::remote::RemoteTaskApi;
use crate::sync::{refresh_local, ReplayGate};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tasksync_engine::{
    validate_text, CreateOp, DeleteOp, MonotonicClock, OutboxOperation, Task, TaskPatch,
    TaskStats, TaskStatus, Timestamp, UpdateOp,
};
use tokio::sync::MutexGuard;
use tracing::debug;
use uuid::Uuid;

/// How far a mutation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Confirmed by the remote API; nothing left in the outbox.
    Applied,
    /// Waiting in the outbox for a sync cycle.
    Queued,
    /// Settled locally; the server never knew the task.
    LocalOnly,
}

/// Result of a mutation: the local value plus its delivery state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    pub value: T,
    pub delivery: Delivery,
}

impl<T> Committed<T> {
    fn new(value: T, delivery: Delivery) -> Self {
        Self { value, delivery }
    }
}

/// Facade for reading and mutating tasks.
pub struct TaskRepository<R> {
    store: LocalStore,
    remote: Arc<R>,
    connectivity: Connectivity,
    gate: ReplayGate,
    clock: Mutex<MonotonicClock>,
}

impl<R: RemoteTaskApi> TaskRepository<R> {
    /// Build a repository over an open store.
    ///
    /// The enqueue clock starts after the newest queued operation so replay
    /// order survives restarts and wall-clock steps.
    pub async fn open(
        store: LocalStore,
        remote: Arc<R>,
        connectivity: Connectivity,
        gate: ReplayGate,
    ) -> Result<Self> {
        let mut conn = store.acquire().await?;
        let newest = db::max_timestamp(&mut conn).await?.unwrap_or(0);
        drop(conn);

        Ok(Self {
            store,
            remote,
            connectivity,
            gate,
            clock: Mutex::new(MonotonicClock::starting_after(newest)),
        })
    }

    /// Create a task. Title and description are trimmed and required.
    pub async fn create(&self, title: &str, description: &str) -> Result<Committed<Task>> {
        let (title, description) = validate_text(title, description)?;

        let client_id = Uuid::new_v4().to_string();
        let task = Task::new_local(&client_id, title, description, Utc::now());
        let op = CreateOp::new(new_op_id(), &client_id, task.payload(), self.next_timestamp());

        let mut tx = self.store.begin().await?;
        db::upsert_task(&mut tx, &task).await?;
        db::insert_entry(&mut tx, &OutboxOperation::Create(op.clone())).await?;
        tx.commit().await?;
        debug!(client_id = %client_id, op_id = %op.op_id, "task created locally");

        let Some(_gate) = self.begin_attempt(&op.op_id).await? else {
            return Ok(Committed::new(task, Delivery::Queued));
        };

        match self.remote.create(&op.payload).await {
            Ok(server_task) => {
                let mut tx = self.store.begin().await?;
                identity::resolve(&mut tx, &client_id, &server_task).await?;
                db::remove_entry(&mut tx, &op.op_id).await?;
                let current = db::find_task_by_client_id(&mut tx, &client_id).await?;
                tx.commit().await?;

                Ok(Committed::new(
                    current.unwrap_or_else(|| server_task.with_client_id(&client_id)),
                    Delivery::Applied,
                ))
            }
            Err(err) => {
                let delivery = self.abandon_attempt(&op.op_id, err).await?;
                Ok(Committed::new(task, delivery))
            }
        }
    }

    /// Change a task's status.
    pub async fn update_status(&self, task: &Task, status: TaskStatus) -> Result<Committed<Task>> {
        self.update(task, TaskPatch::status(status)).await
    }

    /// Change a task's title and description.
    pub async fn update_text(
        &self,
        task: &Task,
        title: &str,
        description: &str,
    ) -> Result<Committed<Task>> {
        let (title, description) = validate_text(title, description)?;
        self.update(task, TaskPatch::text(title, description)).await
    }

    async fn update(&self, task: &Task, patch: TaskPatch) -> Result<Committed<Task>> {
        let client_id = task.client_id.as_str();
        let timestamp = self.next_timestamp();

        let mut tx = self.store.begin().await?;
        let mut local = db::find_task_by_client_id(&mut tx, client_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task.id.clone()))?;
        local.apply_patch(&patch);
        db::upsert_task(&mut tx, &local).await?;

        let server_id = db::get_server_id(&mut tx, client_id).await?;
        let op = UpdateOp::new(new_op_id(), client_id, server_id.clone(), patch, timestamp);
        db::insert_entry(&mut tx, &OutboxOperation::Update(op.clone())).await?;
        tx.commit().await?;
        debug!(client_id, op_id = %op.op_id, resolved = server_id.is_some(), "task updated locally");

        // Without a server identity there is nothing to call yet.
        let Some(server_id) = server_id else {
            return Ok(Committed::new(local, Delivery::Queued));
        };
        let Some(_gate) = self.begin_attempt(&op.op_id).await? else {
            return Ok(Committed::new(local, Delivery::Queued));
        };

        match self.remote.update(&server_id, &op.payload).await {
            Ok(echoed) => {
                let mut tx = self.store.begin().await?;
                refresh_local(&mut tx, client_id, echoed, &op.payload).await?;
                db::remove_entry(&mut tx, &op.op_id).await?;
                let current = db::find_task_by_client_id(&mut tx, client_id).await?;
                tx.commit().await?;

                Ok(Committed::new(current.unwrap_or(local), Delivery::Applied))
            }
            Err(err) => {
                let delivery = self.abandon_attempt(&op.op_id, err).await?;
                Ok(Committed::new(local, delivery))
            }
        }
    }

    /// Delete a task.
    ///
    /// A task the server never saw is dropped together with its pending
    /// create and nothing is sent.
    pub async fn delete(&self, task: &Task) -> Result<Committed<()>> {
        let client_id = task.client_id.as_str();
        let timestamp = self.next_timestamp();

        let mut tx = self.store.begin().await?;
        db::delete_task(&mut tx, &task.id, client_id).await?;
        let server_id = db::get_server_id(&mut tx, client_id).await?;

        if server_id.is_none() {
            if let Some(create_id) = db::take_unclaimed_create(&mut tx, client_id).await? {
                let discarded = db::remove_unclaimed_for(&mut tx, client_id).await?;
                tx.commit().await?;
                debug!(client_id, op_id = %create_id, discarded, "discarded unsent create");
                return Ok(Committed::new((), Delivery::LocalOnly));
            }
        }

        let op = DeleteOp::new(
            new_op_id(),
            Some(client_id.to_string()),
            server_id.clone(),
            timestamp,
        );
        db::insert_entry(&mut tx, &OutboxOperation::Delete(op.clone())).await?;
        tx.commit().await?;
        debug!(client_id, op_id = %op.op_id, "task deleted locally");

        let Some(server_id) = server_id else {
            return Ok(Committed::new((), Delivery::Queued));
        };
        let Some(_gate) = self.begin_attempt(&op.op_id).await? else {
            return Ok(Committed::new((), Delivery::Queued));
        };

        match self.remote.delete(&server_id).await {
            Ok(()) | Err(Error::RemoteNotFound) => {
                let mut conn = self.store.acquire().await?;
                db::remove_entry(&mut conn, &op.op_id).await?;
                Ok(Committed::new((), Delivery::Applied))
            }
            Err(err) => {
                let delivery = self.abandon_attempt(&op.op_id, err).await?;
                Ok(Committed::new((), delivery))
            }
        }
    }

    /// The local snapshot, newest first.
    pub async fn list(&self) -> Result<Vec<Task>> {
        let mut conn = self.store.acquire().await?;
        Ok(db::list_tasks(&mut conn).await?)
    }

    /// Look a task up by its current id or its client id.
    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        let mut conn = self.store.acquire().await?;
        match db::get_task(&mut conn, id).await? {
            Some(task) => Ok(Some(task)),
            None => Ok(db::find_task_by_client_id(&mut conn, id).await?),
        }
    }

    /// Operations waiting for the remote API.
    pub async fn pending_count(&self) -> Result<u64> {
        let mut conn = self.store.acquire().await?;
        Ok(db::count_entries(&mut conn).await?)
    }

    pub async fn stats(&self) -> Result<TaskStats> {
        let tasks = self.list().await?;
        Ok(TaskStats::from_tasks(&tasks))
    }

    /// Operations given up on after exhausting their retry budget.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut conn = self.store.acquire().await?;
        Ok(db::list_dead_letters(&mut conn).await?)
    }

    fn next_timestamp(&self) -> Timestamp {
        let mut clock = self
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clock.now()
    }

    /// Get permission for an immediate remote call on a queued entry.
    ///
    /// `None` when offline, when a sync cycle is running, when the entry is
    /// already gone or claimed, or when an earlier operation on the same task
    /// is still queued. That earlier operation has to reach the server first.
    async fn begin_attempt(&self, op_id: &str) -> Result<Option<MutexGuard<'_, ()>>> {
        if !self.connectivity.is_online() {
            return Ok(None);
        }
        let Some(guard) = self.gate.try_enter() else {
            debug!(op_id, "sync cycle running, leaving operation queued");
            return Ok(None);
        };

        let mut conn = self.store.acquire().await?;
        if !db::claim_in_order(&mut conn, op_id).await? {
            debug!(op_id, "operation waits behind earlier queued work");
            return Ok(None);
        }
        Ok(Some(guard))
    }

    /// Give an entry back to the outbox after a failed immediate call.
    ///
    /// Transient failures and 404s only mean "queued"; other failures are
    /// returned to the caller while the entry stays queued.
    async fn abandon_attempt(&self, op_id: &str, err: Error) -> Result<Delivery> {
        let mut conn = self.store.acquire().await?;
        db::release_claim(&mut conn, op_id).await?;
        drop(conn);

        match err {
            Error::NetworkUnavailable(reason) => {
                debug!(op_id, %reason, "remote unavailable, operation queued");
                Ok(Delivery::Queued)
            }
            Error::RemoteNotFound => {
                debug!(op_id, "remote resource missing, operation queued");
                Ok(Delivery::Queued)
            }
            other => Err(other),
        }
    }
}

fn new_op_id() -> String {
    Uuid::new_v4().to_string()
}
