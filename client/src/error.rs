//! Unified error handling for the client.

/// Client error type.
///
/// The first four variants are the remote failure taxonomy the sync logic
/// branches on; the rest are local failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote call could not be attempted, timed out, or hit a 5xx.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote API refused the request (4xx other than 404).
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// The remote resource does not exist (404).
    #[error("remote resource not found")]
    RemoteNotFound,

    /// A client id would resolve to two different server ids.
    #[error(
        "mapping violation: client id '{client_id}' already maps to '{existing}', refusing '{attempted}'"
    )]
    MappingViolation {
        client_id: String,
        existing: String,
        attempted: String,
    },

    #[error("invalid response from remote: {0}")]
    InvalidResponse(String),

    #[error("invalid api url: {0}")]
    InvalidUrl(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Engine error: {0}")]
    Engine(tasksync_engine::Error),
}

impl From<tasksync_engine::Error> for Error {
    fn from(err: tasksync_engine::Error) -> Self {
        match err {
            tasksync_engine::Error::MappingViolation {
                client_id,
                existing,
                attempted,
            } => Error::MappingViolation {
                client_id,
                existing,
                attempted,
            },
            other => Error::Engine(other),
        }
    }
}

impl Error {
    /// Failures that must abort the current logical action instead of
    /// leaving work queued for retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MappingViolation { .. } | Error::Store(_) | Error::Migrate(_)
        )
    }

    /// Failures that only mean "try again later".
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_))
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
