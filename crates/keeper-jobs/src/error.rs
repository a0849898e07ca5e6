use keeper_agent::AgentError;
use keeper_store::StoreError;
use thiserror::Error;

/// Failures inside a single dispatch or sync step.
///
/// These never reach the scheduler engine: each task converts them into a
/// logged [`RunOutcome::Failed`](keeper_scheduler::RunOutcome::Failed).
#[derive(Debug, Error)]
pub enum JobsError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("agent: {0}")]
    Agent(#[from] AgentError),
}

pub type Result<T> = std::result::Result<T, JobsError>;
