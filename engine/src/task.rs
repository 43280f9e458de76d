//! Task types and their wire payloads.

use crate::{ClientId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// The remote API speaks Spanish status names; those are the serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "Pendiente")]
    Pending,
    #[serde(rename = "En Progreso")]
    InProgress,
    #[serde(rename = "Completada")]
    Done,
}

impl TaskStatus {
    /// Wire name used by the remote API and the local store.
    pub fn as_wire(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pendiente",
            TaskStatus::InProgress => "En Progreso",
            TaskStatus::Done => "Completada",
        }
    }

    /// Parse a wire name. Unknown values fall back to [`TaskStatus::Pending`].
    pub fn from_wire(value: &str) -> Self {
        match value {
            "En Progreso" => TaskStatus::InProgress,
            "Completada" => TaskStatus::Done,
            _ => TaskStatus::Pending,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A task as held in the local snapshot.
///
/// `id` is either the client-generated identifier (not yet known to the
/// server) or the server-assigned one. `client_id` never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub client_id: ClientId,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Task {
    /// Create an optimistic local task whose identifier is its client id.
    pub fn new_local(
        client_id: impl Into<ClientId>,
        title: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let client_id = client_id.into();
        Self {
            id: client_id.clone(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            client_id,
            created_at,
            deleted: false,
        }
    }

    /// True while the server identity of this task is unknown locally.
    pub fn is_local_only(&self) -> bool {
        self.id == self.client_id
    }

    /// The POST body for this task.
    pub fn payload(&self) -> TaskPayload {
        TaskPayload {
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
        }
    }

    /// Apply a partial update in place.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
    }

    /// Adopt the authoritative server copy, keeping the stable client id.
    pub fn with_client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
}

/// Body of `PUT /tasks/{id}`. Absent fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    /// A patch that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A patch that changes title and description.
    pub fn text(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: Some(description.into()),
            status: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.status.is_none()
    }
}

/// Counters over a set of tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub done: usize,
    pub pending: usize,
}

impl TaskStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            if task.status == TaskStatus::Done {
                stats.done += 1;
            }
        }
        stats.pending = stats.total - stats.done;
        stats
    }
}
