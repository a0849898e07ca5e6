use thiserror::Error;

/// Errors returned by the entry-set operations of the scheduler engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// An entry with this id is already live and replacement was not requested.
    #[error("Entry already exists: {id}")]
    EntryExists { id: String },

    /// No live entry has this id (it may have been removed concurrently).
    #[error("Entry not found: {id}")]
    EntryNotFound { id: String },

    /// The trigger can never fire (e.g. a zero interval).
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
