//! Mirror agent-side state into the store: projects, execution status, units.
//!
//! One failing project never stops the others; each failure is logged and
//! counted in the returned [`SyncReport`].

use std::sync::Arc;

use async_trait::async_trait;
use keeper_agent::ExecutionAgent;
use keeper_core::Project;
use keeper_scheduler::RunOutcome;
use keeper_store::{JobStore, UnitChanges};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::scope::ScopedTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Projects synced successfully.
    pub projects: usize,
    pub failures: usize,
}

impl SyncReport {
    fn into_outcome(self, what: &str) -> RunOutcome {
        if self.failures == 0 {
            RunOutcome::Completed
        } else {
            RunOutcome::Failed(format!("{what}: {} failure(s)", self.failures))
        }
    }
}

/// Insert every agent-side project the store does not know yet.
pub async fn sync_projects(agent: &dyn ExecutionAgent, store: &JobStore) -> SyncReport {
    let mut report = SyncReport::default();
    let names = match agent.list_projects().await {
        Ok(names) => names,
        Err(e) => {
            error!(agent = %agent.name(), "listing projects failed: {e}");
            report.failures += 1;
            return report;
        }
    };

    for name in names {
        match store.insert_project_if_missing(&name) {
            Ok(true) => {
                info!(project = %name, "project discovered");
                report.projects += 1;
            }
            Ok(false) => report.projects += 1,
            Err(e) => {
                error!(project = %name, "storing project failed: {e}");
                report.failures += 1;
            }
        }
    }
    report
}

/// Upsert the live status of every execution of every stored project.
pub async fn sync_status(agent: &dyn ExecutionAgent, store: &JobStore) -> SyncReport {
    let mut report = SyncReport::default();
    let Some(projects) = stored_projects(store, &mut report) else {
        return report;
    };
    for project in &projects {
        match project_status(agent, store, project).await {
            Ok(count) => {
                debug!(project = %project.name, count, "execution status synced");
                report.projects += 1;
            }
            Err(e) => {
                error!(project = %project.name, "status sync failed: {e}");
                report.failures += 1;
            }
        }
    }
    report
}

/// Replace each stored project's unit set with the agent's.
pub async fn sync_units(agent: &dyn ExecutionAgent, store: &JobStore) -> SyncReport {
    let mut report = SyncReport::default();
    let Some(projects) = stored_projects(store, &mut report) else {
        return report;
    };
    for project in &projects {
        match project_units(agent, store, project).await {
            Ok(changes) => {
                if changes.added > 0 || changes.removed > 0 {
                    info!(
                        project = %project.name,
                        added = changes.added,
                        removed = changes.removed,
                        "units updated"
                    );
                }
                report.projects += 1;
            }
            Err(e) => {
                error!(project = %project.name, "unit sync failed: {e}");
                report.failures += 1;
            }
        }
    }
    report
}

fn stored_projects(store: &JobStore, report: &mut SyncReport) -> Option<Vec<Project>> {
    match store.list_projects() {
        Ok(projects) => Some(projects),
        Err(e) => {
            error!("listing stored projects failed: {e}");
            report.failures += 1;
            None
        }
    }
}

async fn project_status(
    agent: &dyn ExecutionAgent,
    store: &JobStore,
    project: &Project,
) -> Result<usize> {
    let executions = agent.list_statuses(project).await?;
    for exec in &executions {
        store.upsert_execution(project.id, exec)?;
    }
    Ok(executions.len())
}

async fn project_units(
    agent: &dyn ExecutionAgent,
    store: &JobStore,
    project: &Project,
) -> Result<UnitChanges> {
    let units = agent.list_units(project).await?;
    Ok(store.replace_units(project.id, &units)?)
}

/// Periodic body for [`sync_projects`].
pub struct ProjectSync {
    agent: Arc<dyn ExecutionAgent>,
}

/// Periodic body for [`sync_status`].
pub struct StatusSync {
    agent: Arc<dyn ExecutionAgent>,
}

/// Periodic body for [`sync_units`].
pub struct UnitSync {
    agent: Arc<dyn ExecutionAgent>,
}

impl ProjectSync {
    pub fn new(agent: Arc<dyn ExecutionAgent>) -> Self {
        Self { agent }
    }
}

impl StatusSync {
    pub fn new(agent: Arc<dyn ExecutionAgent>) -> Self {
        Self { agent }
    }
}

impl UnitSync {
    pub fn new(agent: Arc<dyn ExecutionAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ScopedTask for ProjectSync {
    fn name(&self) -> &str {
        "sync_projects"
    }

    async fn run(&self, store: &JobStore) -> RunOutcome {
        sync_projects(self.agent.as_ref(), store)
            .await
            .into_outcome("projects")
    }
}

#[async_trait]
impl ScopedTask for StatusSync {
    fn name(&self) -> &str {
        "sync_status"
    }

    async fn run(&self, store: &JobStore) -> RunOutcome {
        sync_status(self.agent.as_ref(), store)
            .await
            .into_outcome("status")
    }
}

#[async_trait]
impl ScopedTask for UnitSync {
    fn name(&self) -> &str {
        "sync_spiders"
    }

    async fn run(&self, store: &JobStore) -> RunOutcome {
        sync_units(self.agent.as_ref(), store)
            .await
            .into_outcome("units")
    }
}
