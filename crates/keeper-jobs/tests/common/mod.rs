#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use keeper_agent::{AgentError, ExecutionAgent};
use keeper_core::{CronFields, JobDefinition, Project, RemoteExecution};
use keeper_jobs::{Dispatcher, Reconciler};
use keeper_scheduler::SchedulerEngine;
use keeper_store::{JobStore, NewJobDefinition, StoreContext};
use tempfile::TempDir;

/// In-memory stand-in for a remote agent.
#[derive(Default)]
pub struct FakeAgent {
    pub projects: Vec<String>,
    pub units: HashMap<String, Vec<String>>,
    pub statuses: HashMap<String, Vec<RemoteExecution>>,
    /// Projects whose per-project calls fail.
    pub broken: HashSet<String>,
    /// Makes `list_projects` fail as if the agent were down.
    pub projects_unavailable: bool,
    pub refuse_starts: bool,
    pub started: Mutex<Vec<(String, String)>>,
    pub counter: AtomicUsize,
}

impl FakeAgent {
    fn check(&self, project: &Project) -> Result<(), AgentError> {
        if self.broken.contains(&project.name) {
            return Err(AgentError::Remote(format!("project {} is broken", project.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionAgent for FakeAgent {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_projects(&self) -> Result<Vec<String>, AgentError> {
        if self.projects_unavailable {
            return Err(AgentError::Unavailable("connection refused".into()));
        }
        Ok(self.projects.clone())
    }

    async fn list_units(&self, project: &Project) -> Result<Vec<String>, AgentError> {
        self.check(project)?;
        Ok(self.units.get(&project.name).cloned().unwrap_or_default())
    }

    async fn start_unit(&self, project: &Project, job: &JobDefinition) -> Result<String, AgentError> {
        if self.refuse_starts {
            return Err(AgentError::Unavailable("connection refused".into()));
        }
        self.check(project)?;
        self.started
            .lock()
            .unwrap()
            .push((project.name.clone(), job.unit_name.clone()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("remote-{n}"))
    }

    async fn list_statuses(&self, project: &Project) -> Result<Vec<RemoteExecution>, AgentError> {
        self.check(project)?;
        Ok(self.statuses.get(&project.name).cloned().unwrap_or_default())
    }
}

/// A temporary store plus an idle engine wired to a reconciler.
pub struct Harness {
    _dir: TempDir,
    pub ctx: StoreContext,
    pub engine: Arc<SchedulerEngine>,
    pub agent: Arc<FakeAgent>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new(agent: FakeAgent) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StoreContext::open(dir.path().join("keeper.db")).unwrap();
        let engine = Arc::new(SchedulerEngine::new(Duration::from_secs(1)));
        let agent = Arc::new(agent);
        let dispatcher = Arc::new(Dispatcher::new(agent.clone()));
        let reconciler = Reconciler::new(&engine, dispatcher, ctx.clone());
        Self {
            _dir: dir,
            ctx,
            engine,
            agent,
            reconciler,
        }
    }

    pub fn store(&self) -> JobStore {
        self.ctx.scope().unwrap()
    }

    /// Project id for `name`, creating it if needed.
    pub fn project(&self, name: &str) -> i64 {
        let store = self.store();
        store.insert_project_if_missing(name).unwrap();
        store
            .list_projects()
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
            .id
    }

    pub fn periodic_job(
        &self,
        project_id: i64,
        unit: &str,
        cron: CronFields,
        modified_at: DateTime<Utc>,
    ) -> JobDefinition {
        let new = NewJobDefinition {
            modified_at: Some(modified_at),
            ..NewJobDefinition::periodic(project_id, unit, cron)
        };
        self.store().insert_job_definition(&new).unwrap()
    }

    /// Overwrite a stored column so the row no longer maps to a definition.
    pub fn corrupt_job(&self, job_id: i64, column: &str, value: &str) {
        let conn = rusqlite::Connection::open(self.ctx.path()).unwrap();
        conn.execute(
            &format!("UPDATE job_definitions SET {column} = ?1 WHERE id = ?2"),
            rusqlite::params![value, job_id],
        )
        .unwrap();
    }

    pub fn sorted_ids(&self) -> Vec<String> {
        let mut ids = self.engine.list_entry_ids();
        ids.sort();
        ids
    }
}

pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}
