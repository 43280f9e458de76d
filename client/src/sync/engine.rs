//! One sync cycle: fetch, drain, reconcile, reload.

use super::ReplayGate;
use crate::db::{self, LocalStore};
use crate::error::{Error, Result};
use crate::identity;
use crate::remote::RemoteTaskApi;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tasksync_engine::{
    merge_remote_listing, replay_order, wall_clock_millis, CreateOp, DeleteOp, OpOutcome,
    OperationKind, OutboxOperation, QueuedOp, RetryPolicy, SyncReport, Task, TaskBarrier,
    UpdateOp,
};
use tracing::{debug, info, warn};

/// Replays the outbox against the remote API and rebuilds the snapshot.
///
/// Cheap to clone; clones share the store, the remote and the gate.
#[derive(Debug)]
pub struct SyncEngine<R> {
    store: LocalStore,
    remote: Arc<R>,
    gate: ReplayGate,
    policy: RetryPolicy,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: Arc::clone(&self.remote),
            gate: self.gate.clone(),
            policy: self.policy,
        }
    }
}

impl<R: RemoteTaskApi> SyncEngine<R> {
    pub fn new(store: LocalStore, remote: Arc<R>, gate: ReplayGate, policy: RetryPolicy) -> Self {
        Self {
            store,
            remote,
            gate,
            policy,
        }
    }

    /// Run one full cycle.
    ///
    /// Waits for any running cycle to finish first. A failing initial
    /// listing aborts with no local changes. Mapping violations and store
    /// failures abort the cycle with an error; everything else is recorded
    /// in the report.
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let _gate = self.gate.enter().await;
        let started = Instant::now();
        debug!("sync cycle started");

        // 1. fetch remote snapshot
        let listing = match self.remote.list().await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "sync cycle aborted: remote listing failed");
                return Err(err);
            }
        };
        let remote_ids: HashSet<String> = listing.into_iter().map(|t| t.id).collect();

        let mut report = SyncReport::new();

        // 2. drain the outbox
        self.drain(&mut report).await?;

        // 3. local-only creations the outbox no longer covers
        self.upload_unsynced(&remote_ids, &mut report).await?;

        // 4. reload from the now-canonical listing
        self.reload(&mut report).await?;

        info!(
            applied = report.applied.len(),
            dropped = report.dropped.len(),
            still_queued = report.still_queued(),
            dead_lettered = report.dead_lettered.len(),
            uploaded = report.uploaded.len(),
            adopted = report.adopted.len(),
            reloaded = report.reloaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync cycle finished"
        );
        Ok(report)
    }

    async fn drain(&self, report: &mut SyncReport) -> Result<()> {
        let entries = {
            let mut conn = self.store.acquire().await?;
            // Holding the gate, so no claim can belong to a live attempt.
            let released = db::release_all_claims(&mut conn).await?;
            if released > 0 {
                debug!(released, "released stale outbox claims");
            }
            db::load_entries(&mut conn).await?
        };

        let now = wall_clock_millis();
        let mut barrier = TaskBarrier::new();

        for entry in replay_order(entries) {
            let op = &entry.operation;
            let outcome = if !barrier.admits(op) {
                OpOutcome::Blocked
            } else if !entry.is_due(now) {
                OpOutcome::Deferred
            } else {
                self.replay(&entry).await?
            };

            match &outcome {
                OpOutcome::Retained { reason } => {
                    warn!(op_id = %op.op_id(), kind = %op.kind(), %reason, "operation left queued");
                    barrier.hold(op);
                }
                OpOutcome::DeadLettered { reason } => {
                    warn!(op_id = %op.op_id(), kind = %op.kind(), %reason, "operation dead-lettered");
                }
                OpOutcome::Deferred | OpOutcome::Blocked => {
                    debug!(op_id = %op.op_id(), ?outcome, "operation postponed");
                    barrier.hold(op);
                }
                OpOutcome::Applied | OpOutcome::Dropped => {
                    debug!(op_id = %op.op_id(), kind = %op.kind(), ?outcome, "operation replayed");
                }
            }
            report.record(op.op_id(), &outcome);
        }

        Ok(())
    }

    async fn replay(&self, entry: &QueuedOp) -> Result<OpOutcome> {
        match &entry.operation {
            OutboxOperation::Create(op) => self.replay_create(entry, op).await,
            OutboxOperation::Update(op) => self.replay_update(entry, op).await,
            OutboxOperation::Delete(op) => self.replay_delete(entry, op).await,
        }
    }

    async fn replay_create(&self, entry: &QueuedOp, op: &CreateOp) -> Result<OpOutcome> {
        {
            let mut conn = self.store.acquire().await?;
            if db::get_server_id(&mut conn, &op.client_id).await?.is_some() {
                // Already created by an earlier attempt.
                db::remove_entry(&mut conn, &op.op_id).await?;
                return Ok(OpOutcome::Dropped);
            }
            if !db::claim_entry(&mut conn, &op.op_id).await? {
                return Ok(OpOutcome::Dropped);
            }
        }

        match self.remote.create(&op.payload).await {
            Ok(server_task) => {
                let mut tx = self.store.begin().await?;
                identity::resolve(&mut tx, &op.client_id, &server_task).await?;
                db::remove_entry(&mut tx, &op.op_id).await?;
                tx.commit().await?;
                Ok(OpOutcome::Applied)
            }
            Err(err) => self.failed(entry, err).await,
        }
    }

    async fn replay_update(&self, entry: &QueuedOp, op: &UpdateOp) -> Result<OpOutcome> {
        let server_id = {
            let mut conn = self.store.acquire().await?;
            let server_id = db::get_server_id(&mut conn, &op.client_id)
                .await?
                .or_else(|| op.server_id.clone());
            let Some(server_id) = server_id else {
                warn!(op_id = %op.op_id, client_id = %op.client_id, "dropping update for a task the server never saw");
                db::remove_entry(&mut conn, &op.op_id).await?;
                return Ok(OpOutcome::Dropped);
            };
            if !db::claim_entry(&mut conn, &op.op_id).await? {
                return Ok(OpOutcome::Dropped);
            }
            server_id
        };

        match self.remote.update(&server_id, &op.payload).await {
            Ok(echoed) => {
                let mut tx = self.store.begin().await?;
                refresh_local(&mut tx, &op.client_id, echoed, &op.payload).await?;
                db::remove_entry(&mut tx, &op.op_id).await?;
                tx.commit().await?;
                Ok(OpOutcome::Applied)
            }
            Err(Error::RemoteNotFound) => {
                let mut conn = self.store.acquire().await?;
                db::remove_entry(&mut conn, &op.op_id).await?;
                Ok(OpOutcome::Dropped)
            }
            Err(err) => self.failed(entry, err).await,
        }
    }

    async fn replay_delete(&self, entry: &QueuedOp, op: &DeleteOp) -> Result<OpOutcome> {
        let server_id = {
            let mut conn = self.store.acquire().await?;
            let mapped = match &op.client_id {
                Some(client_id) => db::get_server_id(&mut conn, client_id).await?,
                None => None,
            };
            let Some(server_id) = mapped.or_else(|| op.server_id.clone()) else {
                // The create never landed: nothing to delete.
                db::remove_entry(&mut conn, &op.op_id).await?;
                return Ok(OpOutcome::Dropped);
            };
            if !db::claim_entry(&mut conn, &op.op_id).await? {
                return Ok(OpOutcome::Dropped);
            }
            server_id
        };

        let outcome = match self.remote.delete(&server_id).await {
            Ok(()) => OpOutcome::Applied,
            Err(Error::RemoteNotFound) => OpOutcome::Dropped,
            Err(err) => return self.failed(entry, err).await,
        };

        let client_id = op.client_id.as_deref().unwrap_or(&server_id);
        let mut tx = self.store.begin().await?;
        db::delete_task(&mut tx, &server_id, client_id).await?;
        db::remove_entry(&mut tx, &op.op_id).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Leave a failed entry queued, charging rejections to its budget.
    async fn failed(&self, entry: &QueuedOp, err: Error) -> Result<OpOutcome> {
        if err.is_fatal() {
            return Err(err);
        }

        let op_id = entry.operation.op_id();
        let reason = err.to_string();
        let mut tx = self.store.begin().await?;

        let outcome = if err.is_transient() {
            db::release_claim(&mut tx, op_id).await?;
            OpOutcome::Retained { reason }
        } else {
            let attempts = entry.attempts.saturating_add(1);
            if self.policy.exhausted(attempts) {
                let mut buried = entry.clone();
                buried.attempts = attempts;
                buried.last_error = Some(reason.clone());
                db::bury_entry(&mut tx, &buried, wall_clock_millis()).await?;
                OpOutcome::DeadLettered { reason }
            } else {
                let next = self.policy.next_attempt_at(wall_clock_millis(), attempts);
                db::record_rejection(&mut tx, op_id, attempts, next, &reason).await?;
                OpOutcome::Retained { reason }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn upload_unsynced(
        &self,
        remote_ids: &HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let candidates = {
            let mut conn = self.store.acquire().await?;
            let mapping = identity::load_identity_map(&mut conn).await?;
            let mut candidates = Vec::new();
            for task in db::list_tasks(&mut conn).await? {
                if mapping.is_resolved(&task.client_id) || remote_ids.contains(&task.id) {
                    continue;
                }
                // The drain owns tasks with a queued create or delete; a
                // dead-lettered create is not retried behind its back.
                if db::has_pending(&mut conn, &task.client_id, OperationKind::Create).await?
                    || db::has_pending(&mut conn, &task.client_id, OperationKind::Delete).await?
                    || db::is_buried(&mut conn, &task.client_id).await?
                {
                    continue;
                }
                candidates.push(task);
            }
            candidates
        };

        for task in candidates {
            match self.remote.create(&task.payload()).await {
                Ok(server_task) => {
                    let mut tx = self.store.begin().await?;
                    identity::resolve(&mut tx, &task.client_id, &server_task).await?;
                    tx.commit().await?;
                    debug!(client_id = %task.client_id, server_id = %server_task.id, "uploaded unsynced task");
                    report.uploaded.push(task.client_id);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(client_id = %task.client_id, error = %err, "could not upload unsynced task");
                }
            }
        }

        Ok(())
    }

    async fn reload(&self, report: &mut SyncReport) -> Result<()> {
        let listing = match self.remote.list().await {
            Ok(listing) => listing,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(error = %err, "keeping local snapshot: reload listing failed");
                return Ok(());
            }
        };

        let mut tx = self.store.begin().await?;
        let local = db::list_tasks(&mut tx).await?;
        let mapping = identity::load_identity_map(&mut tx).await?;
        let pending: Vec<OutboxOperation> = db::load_entries(&mut tx)
            .await?
            .into_iter()
            .map(|entry| entry.operation)
            .collect();

        let merged = merge_remote_listing(listing, local, &mapping, &pending);
        for server_id in &merged.adopted {
            identity::adopt(&mut tx, server_id).await?;
        }
        db::replace_tasks(&mut tx, &merged.tasks).await?;
        tx.commit().await?;

        report.adopted = merged.adopted;
        report.reloaded = true;
        Ok(())
    }
}

/// Bring the snapshot entry of `client_id` up to date after a PUT.
///
/// Missing entries (deleted meanwhile) stay missing.
pub(crate) async fn refresh_local(
    conn: &mut sqlx::SqliteConnection,
    client_id: &str,
    echoed: Option<Task>,
    patch: &tasksync_engine::TaskPatch,
) -> Result<()> {
    let Some(local) = db::find_task_by_client_id(&mut *conn, client_id).await? else {
        return Ok(());
    };

    let updated = match echoed {
        Some(server_task) => {
            let mut task = server_task.with_client_id(client_id);
            task.deleted = false;
            if task.id != local.id {
                db::delete_task(&mut *conn, &local.id, client_id).await?;
            }
            task
        }
        None => {
            let mut task = local;
            task.apply_patch(patch);
            task
        }
    };

    db::upsert_task(conn, &updated).await?;
    Ok(())
}
