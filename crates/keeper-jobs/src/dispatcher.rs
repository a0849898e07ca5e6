use std::sync::Arc;

use async_trait::async_trait;
use keeper_agent::ExecutionAgent;
use keeper_scheduler::RunOutcome;
use keeper_store::JobStore;
use tracing::{error, info};

use crate::error::Result;
use crate::scope::ScopedTask;

/// What happened when a job definition was handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started {
        /// Id of the stored execution record.
        execution_id: String,
        /// Id the agent assigned to the run.
        remote_id: String,
    },
    Failed(String),
}

/// Starts one run of a job definition on the execution agent.
pub struct Dispatcher {
    agent: Arc<dyn ExecutionAgent>,
}

impl Dispatcher {
    pub fn new(agent: Arc<dyn ExecutionAgent>) -> Self {
        Self { agent }
    }

    /// Look up `job_id`, start it on the agent and record the execution.
    ///
    /// Never returns an error: every failure is logged and reported as
    /// [`DispatchOutcome::Failed`].
    pub async fn dispatch(&self, store: &JobStore, job_id: i64) -> DispatchOutcome {
        match self.start(store, job_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id, agent = %self.agent.name(), "job dispatch failed: {e}");
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    async fn start(&self, store: &JobStore, job_id: i64) -> Result<DispatchOutcome> {
        let job = store.get_job_definition(job_id)?;
        let project = store.get_project(job.project_id)?;

        let remote_id = self.agent.start_unit(&project, &job).await?;
        let execution_id =
            store.record_started(project.id, Some(job.id), &job.unit_name, &remote_id)?;

        info!(
            project = %project.name,
            unit = %job.unit_name,
            job_id,
            remote_id = %remote_id,
            "job started"
        );
        Ok(DispatchOutcome::Started {
            execution_id,
            remote_id,
        })
    }
}

/// Scheduled entry body for one job definition.
pub struct DispatchJob {
    job_id: i64,
    name: String,
    dispatcher: Arc<Dispatcher>,
}

impl DispatchJob {
    pub fn new(job_id: i64, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            job_id,
            name: format!("dispatch_job_{job_id}"),
            dispatcher,
        }
    }
}

#[async_trait]
impl ScopedTask for DispatchJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, store: &JobStore) -> RunOutcome {
        match self.dispatcher.dispatch(store, self.job_id).await {
            DispatchOutcome::Started { .. } => RunOutcome::Completed,
            DispatchOutcome::Failed(reason) => RunOutcome::Failed(reason),
        }
    }
}
