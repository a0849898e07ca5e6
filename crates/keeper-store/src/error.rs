use thiserror::Error;

use keeper_core::ValidationError;

/// Errors that can occur while reading or writing the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job definition with the given id exists (it may have been deleted
    /// between scheduling and firing).
    #[error("job definition not found: {id}")]
    JobNotFound { id: i64 },

    #[error("project not found: {id}")]
    ProjectNotFound { id: i64 },

    /// A stored row holds a value the domain types reject.
    #[error("invalid stored value: {0}")]
    Invalid(#[from] ValidationError),

    /// The database file's parent directory could not be created.
    #[error("cannot prepare database path {path}: {source}")]
    Path {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
