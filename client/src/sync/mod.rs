//! Outbox replay and reconciliation with the remote authority.

mod driver;
mod engine;

pub use driver::{SyncDriver, SyncHandle};
pub use engine::SyncEngine;

pub(crate) use engine::refresh_local;

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Serializes remote replay work.
///
/// A sync cycle holds the gate for its whole duration. Immediate-apply
/// attempts only try it and leave their entry queued when it is taken, so
/// an operation is never sent by two parties at once.
#[derive(Debug, Clone, Default)]
pub struct ReplayGate {
    inner: Arc<Mutex<()>>,
}

impl ReplayGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the gate.
    pub async fn enter(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }

    /// Take the gate if nobody holds it.
    pub fn try_enter(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.try_lock().ok()
    }
}
