use std::sync::Arc;
use std::time::Duration;

use keeper_agent::ExecutionAgent;
use keeper_core::config::SchedulerConfig;
use keeper_scheduler::{EntryOptions, ScheduledJob, SchedulerEngine, Trigger};
use keeper_store::StoreContext;
use tracing::info;

use crate::reconciler::Reconciler;
use crate::scope::{Scoped, ScopedTask};
use crate::sync::{ProjectSync, StatusSync, UnitSync};

pub const SYNC_PROJECTS_ID: &str = "sys_sync_projects";
pub const SYNC_STATUS_ID: &str = "sys_sync_status";
pub const SYNC_UNITS_ID: &str = "sys_sync_spiders";
pub const RELOAD_JOBS_ID: &str = "sys_reload_job";

/// Fixed intervals of the system tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemIntervals {
    pub sync_projects: Duration,
    pub sync_status: Duration,
    pub sync_units: Duration,
    pub reconcile: Duration,
}

impl Default for SystemIntervals {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl SystemIntervals {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            sync_projects: Duration::from_secs(config.sync_projects_secs),
            sync_status: Duration::from_secs(config.sync_status_secs),
            sync_units: Duration::from_secs(config.sync_units_secs),
            reconcile: Duration::from_secs(config.reconcile_secs),
        }
    }
}

/// Install the four system tasks, replacing any earlier registration under
/// the same ids. Each run gets its own store scope.
pub fn register_system_tasks(
    engine: &SchedulerEngine,
    ctx: &StoreContext,
    agent: Arc<dyn ExecutionAgent>,
    reconciler: Arc<Reconciler>,
    intervals: SystemIntervals,
) -> keeper_scheduler::Result<()> {
    let tasks: [(&str, Duration, Arc<dyn ScheduledJob>); 4] = [
        (
            SYNC_PROJECTS_ID,
            intervals.sync_projects,
            scoped(ctx, ProjectSync::new(Arc::clone(&agent))),
        ),
        (
            SYNC_STATUS_ID,
            intervals.sync_status,
            scoped(ctx, StatusSync::new(Arc::clone(&agent))),
        ),
        (
            SYNC_UNITS_ID,
            intervals.sync_units,
            scoped(ctx, UnitSync::new(agent)),
        ),
        (
            RELOAD_JOBS_ID,
            intervals.reconcile,
            scoped(ctx, reconciler),
        ),
    ];

    for (id, every, job) in tasks {
        let options = EntryOptions {
            misfire_grace: every,
            max_instances: 1,
            coalesce: true,
            replace_existing: true,
        };
        engine.add_entry(id, Trigger::every(every), job, options)?;
        info!(entry_id = id, every_secs = every.as_secs(), "system task registered");
    }
    Ok(())
}

fn scoped<T: ScopedTask + 'static>(ctx: &StoreContext, task: T) -> Arc<dyn ScheduledJob> {
    Arc::new(Scoped::new(ctx.clone(), task))
}
