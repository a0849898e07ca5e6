use std::sync::Arc;
use std::time::Duration;

use keeper_agent::{ExecutionAgent, ScrapydAgent};
use keeper_core::config::KeeperConfig;
use keeper_jobs::{register_system_tasks, Dispatcher, Reconciler, SystemIntervals};
use keeper_scheduler::SchedulerEngine;
use keeper_store::StoreContext;
use tracing::{info, warn};

/// Every long-lived component, wired once at startup.
pub struct App {
    pub config: KeeperConfig,
    pub ctx: StoreContext,
    pub agent: Arc<dyn ExecutionAgent>,
    pub engine: Arc<SchedulerEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<Reconciler>,
}

impl App {
    pub fn build(config: KeeperConfig) -> anyhow::Result<Self> {
        let ctx = StoreContext::open(&config.database.path)?;

        let agent: Arc<dyn ExecutionAgent> = Arc::new(ScrapydAgent::new(
            config.agent.base_url.clone(),
            Duration::from_secs(config.agent.timeout_secs),
        )?);
        info!(agent = %agent.name(), url = %config.agent.base_url, "execution agent configured");

        let engine = Arc::new(SchedulerEngine::new(Duration::from_millis(
            config.scheduler.tick_millis,
        )));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&agent)));
        let reconciler = Arc::new(
            Reconciler::new(&engine, Arc::clone(&dispatcher), ctx.clone())
                .with_config(&config.scheduler),
        );

        Ok(Self {
            config,
            ctx,
            agent,
            engine,
            dispatcher,
            reconciler,
        })
    }

    /// Install the system tasks and run an initial reconcile pass so
    /// periodic jobs are live before the first reload tick.
    pub fn install(&self) -> anyhow::Result<()> {
        register_system_tasks(
            &self.engine,
            &self.ctx,
            Arc::clone(&self.agent),
            Arc::clone(&self.reconciler),
            SystemIntervals::from_config(&self.config.scheduler),
        )?;

        // A failed first pass is retried by the reload task.
        match self.ctx.scope().and_then(|store| self.reconciler.reconcile(&store)) {
            Ok(report) => info!(
                added = report.added,
                invalid = report.invalid,
                "initial reconcile pass"
            ),
            Err(e) => warn!("initial reconcile pass failed: {e}"),
        }
        Ok(())
    }
}
