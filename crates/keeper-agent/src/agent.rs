use async_trait::async_trait;
use keeper_core::{JobDefinition, Project, RemoteExecution};

/// The remote service that actually launches units of work.
///
/// Every call is a network round trip bounded by the implementation's own
/// timeout. Callers treat any error as transient: nothing here retries, the
/// next periodic firing is the retry.
#[async_trait]
pub trait ExecutionAgent: Send + Sync {
    /// Agent name for logging and error messages.
    fn name(&self) -> &str;

    /// Names of every project deployed on the agent.
    async fn list_projects(&self) -> Result<Vec<String>, AgentError>;

    /// Names of the units of work available in `project`.
    async fn list_units(&self, project: &Project) -> Result<Vec<String>, AgentError>;

    /// Start one run of `job` and return the agent's id for that execution.
    async fn start_unit(&self, project: &Project, job: &JobDefinition)
        -> Result<String, AgentError>;

    /// Live status of every execution the agent knows about in `project`.
    async fn list_statuses(&self, project: &Project) -> Result<Vec<RemoteExecution>, AgentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The agent answered but reported a failure in its payload.
    #[error("agent rejected request: {0}")]
    Remote(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Connection refused or timed out.
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}
