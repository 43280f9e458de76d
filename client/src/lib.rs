//! # tasksync client
//!
//! Offline-first task client. Mutations go through [`TaskRepository`],
//! which writes the local snapshot and the outbox in one transaction and
//! then tries the remote API right away. [`SyncEngine`] drains whatever is
//! left once connectivity returns and rebuilds the snapshot from the
//! server's listing; [`SyncDriver`] decides when that happens.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tasksync_client::{
//!     Connectivity, HttpTaskApi, LocalStore, ReplayGate, SyncEngine, TaskRepository,
//! };
//! use tasksync_engine::RetryPolicy;
//!
//! # async fn demo() -> tasksync_client::Result<()> {
//! let store = LocalStore::open("sqlite://tasks.db").await?;
//! let remote = Arc::new(HttpTaskApi::new(
//!     "https://example.com/api",
//!     None,
//!     std::time::Duration::from_secs(10),
//! )?);
//! let connectivity = Connectivity::new(false);
//! let gate = ReplayGate::new();
//!
//! let repo = TaskRepository::open(store.clone(), Arc::clone(&remote), connectivity.clone(), gate.clone()).await?;
//! repo.create("Buy milk", "2 litres").await?;
//!
//! connectivity.set_online(true);
//! let engine = SyncEngine::new(store, remote, gate, RetryPolicy::default());
//! let report = engine.run_cycle().await?;
//! println!("applied {} operations", report.applied.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod identity;
pub mod remote;
pub mod repository;
pub mod sync;

pub use config::{Config, ConfigError};
pub use connectivity::Connectivity;
pub use db::{DeadLetter, LocalStore};
pub use error::{Error, Result};
pub use remote::{HttpTaskApi, InMemoryTaskApi, RemoteTaskApi};
pub use repository::{Committed, Delivery, TaskRepository};
pub use sync::{ReplayGate, SyncDriver, SyncEngine, SyncHandle};
