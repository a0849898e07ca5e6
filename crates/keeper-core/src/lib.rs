//! `keeper-core`: configuration and domain types shared by every keeper crate.

pub mod config;
pub mod cron_fields;
pub mod error;
pub mod types;

pub use cron_fields::CronFields;
pub use error::{KeeperError, Result, ValidationError};
pub use types::{
    ExecutionStatus, JobDefinition, JobExecution, Project, RemoteExecution, RunType,
    ScheduleEntryId, SCHEDULE_NAMESPACE,
};
