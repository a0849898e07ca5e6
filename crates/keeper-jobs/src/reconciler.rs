use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::config::SchedulerConfig;
use keeper_core::ScheduleEntryId;
use keeper_scheduler::{EntryOptions, RunOutcome, SchedulerEngine, SchedulerError, Trigger};
use keeper_store::{JobFilter, JobStore, StoreContext, StoreError};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchJob, Dispatcher};
use crate::scope::{Scoped, ScopedTask};

/// Entry changes made by one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    /// Candidates that could not be read or whose cron fields could not be
    /// turned into a trigger.
    pub invalid: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.invalid == 0
    }
}

/// Keeps the engine's `spider_job_*` entries in step with the stored
/// periodic job definitions.
///
/// Entries are never edited in place. A changed definition gets a new entry
/// id (its modification time is part of the id), so each pass removes the
/// stale id and adds the fresh one.
///
/// The engine owns the reload entry that owns this reconciler, so only a
/// weak handle to the engine is kept.
pub struct Reconciler {
    engine: Weak<SchedulerEngine>,
    dispatcher: Arc<Dispatcher>,
    ctx: StoreContext,
    options: EntryOptions,
}

impl Reconciler {
    pub fn new(
        engine: &Arc<SchedulerEngine>,
        dispatcher: Arc<Dispatcher>,
        ctx: StoreContext,
    ) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            dispatcher,
            ctx,
            options: EntryOptions {
                misfire_grace: Duration::from_secs(3600),
                max_instances: 999,
                coalesce: true,
                replace_existing: false,
            },
        }
    }

    /// Take the misfire grace and instance ceiling from config.
    pub fn with_config(mut self, config: &SchedulerConfig) -> Self {
        self.options.misfire_grace = Duration::from_secs(config.misfire_grace_secs);
        self.options.max_instances = config.max_instances;
        self
    }

    /// One pass: add entries for new definitions, remove entries whose
    /// definitions are gone or changed. Entries outside the job namespace
    /// are left alone.
    ///
    /// Definition rows that cannot be read are logged and counted as invalid.
    /// Once the engine is gone a pass does nothing.
    pub fn reconcile(&self, store: &JobStore) -> Result<ReconcileReport, StoreError> {
        let Some(engine) = self.engine.upgrade() else {
            debug!("scheduler engine dropped, skipping reconcile");
            return Ok(ReconcileReport::default());
        };
        let running: HashSet<String> = engine.list_entry_ids().into_iter().collect();
        debug!(entries = ?running, "live schedule entries");

        let scan = store.scan_job_definitions(&JobFilter::reconcilable())?;
        let mut desired = HashSet::with_capacity(scan.jobs.len());
        let mut report = ReconcileReport::default();

        for bad in &scan.rejected {
            error!(job_id = bad.id, "unreadable job definition, not scheduled: {}", bad.reason);
            report.invalid += 1;
        }

        for job in &scan.jobs {
            let entry_id = job.entry_id();
            desired.insert(entry_id.as_str().to_string());
            if running.contains(entry_id.as_str()) {
                continue;
            }

            let trigger = match Trigger::cron(&job.cron) {
                Ok(trigger) => trigger,
                Err(e) => {
                    error!(
                        job_id = job.id,
                        unit = %job.unit_name,
                        entry_id = %entry_id,
                        "invalid cron fields, job not scheduled: {e}"
                    );
                    report.invalid += 1;
                    continue;
                }
            };

            let task = Scoped::new(
                self.ctx.clone(),
                DispatchJob::new(job.id, Arc::clone(&self.dispatcher)),
            );
            match engine.add_entry(
                entry_id.as_str(),
                trigger,
                Arc::new(task),
                self.options.clone(),
            ) {
                Ok(()) => {
                    info!(
                        project_id = job.project_id,
                        unit = %job.unit_name,
                        job_id = job.id,
                        entry_id = %entry_id,
                        cron = %job.cron,
                        "periodic job scheduled"
                    );
                    report.added += 1;
                }
                Err(SchedulerError::EntryExists { .. }) => {
                    debug!(entry_id = %entry_id, "entry added concurrently");
                }
                Err(e) => {
                    error!(job_id = job.id, entry_id = %entry_id, "cannot schedule job: {e}");
                    report.invalid += 1;
                }
            }
        }

        for id in running
            .iter()
            .filter(|id| ScheduleEntryId::is_namespaced(id) && !desired.contains(*id))
        {
            match engine.remove_entry(id) {
                Ok(()) => {
                    info!(entry_id = %id, "periodic job unscheduled");
                    report.removed += 1;
                }
                Err(SchedulerError::EntryNotFound { .. }) => {
                    debug!(entry_id = %id, "entry already removed");
                }
                Err(e) => warn!(entry_id = %id, "cannot remove entry: {e}"),
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl ScopedTask for Reconciler {
    fn name(&self) -> &str {
        "reload_job"
    }

    async fn run(&self, store: &JobStore) -> RunOutcome {
        match self.reconcile(store) {
            Ok(report) => {
                if report.is_noop() {
                    debug!("reconcile pass: no changes");
                } else {
                    info!(
                        added = report.added,
                        removed = report.removed,
                        invalid = report.invalid,
                        "reconcile pass"
                    );
                }
                RunOutcome::Completed
            }
            Err(e) => {
                error!("reconcile pass failed: {e}");
                RunOutcome::Failed(e.to_string())
            }
        }
    }
}
