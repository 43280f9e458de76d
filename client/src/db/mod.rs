//! Durable local store backed by SQLite.
//!
//! Table helpers take a `&mut SqliteConnection` so that callers can compose
//! several of them inside one transaction.

mod dead_letter;
mod mapping;
mod outbox;
mod pool;
mod tasks;

pub use dead_letter::*;
pub use mapping::*;
pub use outbox::*;
pub use pool::*;
pub use tasks::*;
