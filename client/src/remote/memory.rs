//! In-process implementation of the remote task API.
//!
//! Behaves like the real service (server-assigned ids, 404 on unknown ids)
//! and can be switched offline, slowed down, or told to fail specific calls.

use super::RemoteTaskApi;
use crate::error::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tasksync_engine::{Task, TaskPatch, TaskPayload};

/// A call that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List,
    Create { title: String },
    Update { id: String, patch: TaskPatch },
    Delete { id: String },
}

/// Which endpoint an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    List,
    Create,
    Update,
    Delete,
}

/// A failure to return instead of serving a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Unavailable,
    Rejected { status: u16, message: String },
    NotFound,
}

impl InjectedFailure {
    fn into_error(self) -> Error {
        match self {
            InjectedFailure::Unavailable => Error::NetworkUnavailable("injected failure".into()),
            InjectedFailure::Rejected { status, message } => {
                Error::RemoteRejected { status, message }
            }
            InjectedFailure::NotFound => Error::RemoteNotFound,
        }
    }
}

#[derive(Debug)]
pub struct InMemoryTaskApi {
    tasks: DashMap<String, Task>,
    next_id: AtomicU64,
    online: AtomicBool,
    echo_updates: AtomicBool,
    latency_ms: AtomicU64,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<VecDeque<(Endpoint, InjectedFailure)>>,
}

impl Default for InMemoryTaskApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskApi {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            next_id: AtomicU64::new(1),
            online: AtomicBool::new(true),
            echo_updates: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// While offline every call fails with `NetworkUnavailable` and is not
    /// recorded.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delay applied before a call is served.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether `update` answers with the task body.
    pub fn set_echo_updates(&self, echo: bool) {
        self.echo_updates.store(echo, Ordering::SeqCst);
    }

    /// Fail the next `times` calls to `endpoint`.
    pub fn fail_next(&self, endpoint: Endpoint, failure: InjectedFailure, times: usize) {
        let mut failures = lock(&self.failures);
        for _ in 0..times {
            failures.push_back((endpoint, failure.clone()));
        }
    }

    /// Put a task on the server out-of-band.
    pub fn insert_remote(&self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Remove a task from the server out-of-band.
    pub fn remove_remote(&self, id: &str) -> Option<Task> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|entry| entry.value().clone())
    }

    /// Server state, ordered by id.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Calls that reached the server, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    async fn arrive(&self, endpoint: Endpoint, call: RemoteCall) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable("remote is offline".into()));
        }

        lock(&self.calls).push(call);

        let mut failures = lock(&self.failures);
        if let Some(pos) = failures.iter().position(|(e, _)| *e == endpoint) {
            if let Some((_, failure)) = failures.remove(pos) {
                return Err(failure.into_error());
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RemoteTaskApi for InMemoryTaskApi {
    async fn list(&self) -> Result<Vec<Task>> {
        self.arrive(Endpoint::List, RemoteCall::List).await?;
        Ok(self.tasks())
    }

    async fn create(&self, payload: &TaskPayload) -> Result<Task> {
        self.arrive(
            Endpoint::Create,
            RemoteCall::Create {
                title: payload.title.clone(),
            },
        )
        .await?;

        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let task = Task {
            id: id.clone(),
            title: payload.title.clone(),
            description: payload.description.clone(),
            status: payload.status,
            client_id: id.clone(),
            created_at: Utc::now(),
            deleted: false,
        };
        self.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        self.arrive(
            Endpoint::Update,
            RemoteCall::Update {
                id: id.to_string(),
                patch: patch.clone(),
            },
        )
        .await?;

        let mut entry = self.tasks.get_mut(id).ok_or(Error::RemoteNotFound)?;
        entry.apply_patch(patch);
        let task = entry.clone();
        drop(entry);

        if self.echo_updates.load(Ordering::SeqCst) {
            Ok(Some(task))
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.arrive(Endpoint::Delete, RemoteCall::Delete { id: id.to_string() })
            .await?;

        self.tasks
            .remove(id)
            .map(|_| ())
            .ok_or(Error::RemoteNotFound)
    }
}
