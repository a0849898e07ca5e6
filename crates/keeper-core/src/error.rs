use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeeperError {
    /// Short error code string used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            KeeperError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// A persisted value could not be turned into a typed domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// One of the five cron fields does not parse.
    #[error("invalid cron {field} field {value:?}: {reason}")]
    InvalidCronField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown run type: {0}")]
    UnknownRunType(String),

    #[error("unknown execution status: {0}")]
    UnknownExecutionStatus(String),

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

pub type Result<T> = std::result::Result<T, KeeperError>;
