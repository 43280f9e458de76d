//! The remote task API the client reconciles against.

mod http;
mod memory;

pub use http::HttpTaskApi;
pub use memory::{Endpoint, InMemoryTaskApi, InjectedFailure, RemoteCall};

use crate::error::Result;
use std::future::Future;
use tasksync_engine::{Task, TaskPatch, TaskPayload};

/// CRUD surface of the remote authority.
///
/// Failures use the remote taxonomy of [`crate::Error`]:
/// `NetworkUnavailable`, `RemoteRejected`, `RemoteNotFound`, or
/// `InvalidResponse`.
pub trait RemoteTaskApi: Send + Sync + 'static {
    /// `GET /tasks`
    fn list(&self) -> impl Future<Output = Result<Vec<Task>>> + Send;

    /// `POST /tasks`, returning the task with its server identity.
    fn create(&self, payload: &TaskPayload) -> impl Future<Output = Result<Task>> + Send;

    /// `PUT /tasks/{id}`.
    ///
    /// `None` means the server accepted the patch without echoing the task.
    fn update(
        &self,
        id: &str,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Option<Task>>> + Send;

    /// `DELETE /tasks/{id}`
    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}
