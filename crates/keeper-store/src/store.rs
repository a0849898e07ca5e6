use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use keeper_core::{
    CronFields, ExecutionStatus, JobDefinition, JobExecution, Project, RemoteExecution, RunType,
    ValidationError,
};
use rusqlite::{types::Type, Connection, OptionalExtension};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};

const JOB_SELECT_SQL: &str = "SELECT id, project_id, unit_name, scheduled, run_type,
        cron_minutes, cron_hour, cron_day_of_month, cron_day_of_week, cron_month,
        args, priority, modified_at
     FROM job_definitions";

const EXECUTION_SELECT_SQL: &str = "SELECT id, project_id, job_definition_id, remote_id,
        unit_name, status, started_at, finished_at, updated_at
     FROM job_executions";

/// Which job definitions to return from [`JobStore::list_job_definitions`].
/// `None` fields do not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub run_type: Option<RunType>,
    pub scheduled: Option<bool>,
}

impl JobFilter {
    /// Periodic definitions still in their pre-scheduled state.
    pub fn reconcilable() -> Self {
        Self {
            run_type: Some(RunType::Periodic),
            scheduled: Some(false),
        }
    }
}

/// Result of [`JobStore::scan_job_definitions`].
#[derive(Debug, Clone, Default)]
pub struct DefinitionScan {
    pub jobs: Vec<JobDefinition>,
    pub rejected: Vec<RejectedDefinition>,
}

/// A stored definition row whose columns do not map to a [`JobDefinition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDefinition {
    pub id: i64,
    pub reason: String,
}

/// Fields for a new job definition row.
#[derive(Debug, Clone)]
pub struct NewJobDefinition {
    pub project_id: i64,
    pub unit_name: String,
    pub run_type: RunType,
    pub cron: CronFields,
    pub args: Option<String>,
    pub priority: i32,
    /// Defaults to now.
    pub modified_at: Option<DateTime<Utc>>,
}

impl NewJobDefinition {
    pub fn periodic(project_id: i64, unit_name: &str, cron: CronFields) -> Self {
        Self {
            project_id,
            unit_name: unit_name.to_string(),
            run_type: RunType::Periodic,
            cron,
            args: None,
            priority: 0,
            modified_at: None,
        }
    }
}

/// Units added and removed by [`JobStore::replace_units`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitChanges {
    pub added: usize,
    pub removed: usize,
}

/// Read/write access to projects, job definitions, units and executions.
///
/// Wraps a single SQLite connection in a `Mutex`; every method locks for the
/// duration of its statements only, so a `JobStore` can be shared across
/// `.await` points. Obtain one per task run through
/// [`StoreContext::scope`](crate::StoreContext::scope).
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- projects ------------------------------------------------------------

    #[instrument(skip(self))]
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let db = self.db();
        let mut stmt = db.prepare("SELECT id, name, created_at FROM projects ORDER BY id")?;
        let rows = stmt.query_map([], row_to_project)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self))]
    pub fn get_project(&self, id: i64) -> Result<Project> {
        self.db()
            .query_row(
                "SELECT id, name, created_at FROM projects WHERE id = ?1",
                [id],
                row_to_project,
            )
            .optional()?
            .ok_or(StoreError::ProjectNotFound { id })
    }

    /// Insert a project by name unless it already exists. Returns `true` when
    /// a row was created.
    #[instrument(skip(self))]
    pub fn insert_project_if_missing(&self, name: &str) -> Result<bool> {
        let n = self.db().execute(
            "INSERT OR IGNORE INTO projects (name, created_at) VALUES (?1, ?2)",
            rusqlite::params![name, now_rfc3339()],
        )?;
        Ok(n > 0)
    }

    // --- job definitions -----------------------------------------------------

    /// Definitions matching `filter`. Rows that no longer map to a
    /// definition are logged and left out; see [`Self::scan_job_definitions`].
    #[instrument(skip(self))]
    pub fn list_job_definitions(&self, filter: &JobFilter) -> Result<Vec<JobDefinition>> {
        let scan = self.scan_job_definitions(filter)?;
        for bad in &scan.rejected {
            warn!(job_id = bad.id, "skipping unreadable job definition: {}", bad.reason);
        }
        Ok(scan.jobs)
    }

    /// Like [`Self::list_job_definitions`], but each row is mapped on its own
    /// and the ones that fail are returned next to the good ones.
    #[instrument(skip(self))]
    pub fn scan_job_definitions(&self, filter: &JobFilter) -> Result<DefinitionScan> {
        let db = self.db();
        let mut stmt = db.prepare(&format!(
            "{JOB_SELECT_SQL}
             WHERE (?1 IS NULL OR run_type = ?1)
               AND (?2 IS NULL OR scheduled = ?2)
             ORDER BY id"
        ))?;
        let run_type = filter.run_type.map(|r| r.as_str());
        let scheduled = filter.scheduled.map(i64::from);
        let rows = stmt.query_map(rusqlite::params![run_type, scheduled], |row| {
            Ok((row.get::<_, i64>(0)?, row_to_job(row)))
        })?;

        let mut scan = DefinitionScan::default();
        for row in rows {
            match row? {
                (_, Ok(job)) => scan.jobs.push(job),
                (id, Err(e)) => scan.rejected.push(RejectedDefinition {
                    id,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(scan)
    }

    /// Fails with [`StoreError::JobNotFound`] when the definition is gone.
    #[instrument(skip(self))]
    pub fn get_job_definition(&self, id: i64) -> Result<JobDefinition> {
        self.db()
            .query_row(&format!("{JOB_SELECT_SQL} WHERE id = ?1"), [id], row_to_job)
            .optional()?
            .ok_or(StoreError::JobNotFound { id })
    }

    #[instrument(skip(self, new), fields(project_id = new.project_id, unit = %new.unit_name))]
    pub fn insert_job_definition(&self, new: &NewJobDefinition) -> Result<JobDefinition> {
        let now = now_rfc3339();
        let modified = new
            .modified_at
            .map(to_rfc3339)
            .unwrap_or_else(|| now.clone());
        let id = {
            let db = self.db();
            db.execute(
                "INSERT INTO job_definitions
                 (project_id, unit_name, scheduled, run_type,
                  cron_minutes, cron_hour, cron_day_of_month, cron_day_of_week, cron_month,
                  args, priority, created_at, modified_at)
                 VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    new.project_id,
                    new.unit_name,
                    new.run_type.as_str(),
                    new.cron.minute,
                    new.cron.hour,
                    new.cron.day_of_month,
                    new.cron.day_of_week,
                    new.cron.month,
                    new.args,
                    new.priority,
                    now,
                    modified,
                ],
            )?;
            db.last_insert_rowid()
        };
        debug!(job_id = id, "job definition inserted");
        self.get_job_definition(id)
    }

    /// Replace a definition's cron fields and bump its modification time,
    /// which rotates its schedule entry id.
    #[instrument(skip(self, cron))]
    pub fn update_job_cron(
        &self,
        id: i64,
        cron: &CronFields,
        modified_at: DateTime<Utc>,
    ) -> Result<()> {
        let n = self.db().execute(
            "UPDATE job_definitions
             SET cron_minutes = ?1, cron_hour = ?2, cron_day_of_month = ?3,
                 cron_day_of_week = ?4, cron_month = ?5, modified_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                cron.minute,
                cron.hour,
                cron.day_of_month,
                cron.day_of_week,
                cron.month,
                to_rfc3339(modified_at),
                id,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_scheduled(&self, id: i64, scheduled: bool) -> Result<()> {
        let n = self.db().execute(
            "UPDATE job_definitions SET scheduled = ?1, modified_at = ?2 WHERE id = ?3",
            rusqlite::params![i64::from(scheduled), now_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_job_definition(&self, id: i64) -> Result<()> {
        let n = self
            .db()
            .execute("DELETE FROM job_definitions WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id });
        }
        Ok(())
    }

    // --- units ---------------------------------------------------------------

    #[instrument(skip(self))]
    pub fn list_units(&self, project_id: i64) -> Result<Vec<String>> {
        let db = self.db();
        let mut stmt = db.prepare("SELECT name FROM units WHERE project_id = ?1 ORDER BY name")?;
        let rows = stmt.query_map([project_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Make the stored unit set of a project equal to `names`.
    #[instrument(skip(self, names), fields(count = names.len()))]
    pub fn replace_units(&self, project_id: i64, names: &[String]) -> Result<UnitChanges> {
        let now = now_rfc3339();
        let mut db = self.db();
        let tx = db.transaction()?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT name FROM units WHERE project_id = ?1")?;
            let rows = stmt.query_map([project_id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut changes = UnitChanges::default();
        for name in existing.iter().filter(|n| !names.contains(*n)) {
            tx.execute(
                "DELETE FROM units WHERE project_id = ?1 AND name = ?2",
                rusqlite::params![project_id, name],
            )?;
            changes.removed += 1;
        }
        for name in names {
            let n = tx.execute(
                "INSERT INTO units (project_id, name, synced_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(project_id, name) DO UPDATE SET synced_at = excluded.synced_at",
                rusqlite::params![project_id, name, now],
            )?;
            if n > 0 && !existing.contains(name) {
                changes.added += 1;
            }
        }
        tx.commit()?;
        Ok(changes)
    }

    // --- executions ----------------------------------------------------------

    /// Record an execution the dispatcher just started. Returns its id.
    #[instrument(skip(self))]
    pub fn record_started(
        &self,
        project_id: i64,
        job_definition_id: Option<i64>,
        unit_name: &str,
        remote_id: &str,
    ) -> Result<String> {
        // A status sync may have stored the execution first; keep its id.
        let id = self.db().query_row(
            "INSERT INTO job_executions
             (id, project_id, job_definition_id, remote_id, unit_name, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)
             ON CONFLICT(project_id, remote_id) DO UPDATE SET
                job_definition_id = excluded.job_definition_id,
                updated_at = excluded.updated_at
             RETURNING id",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                project_id,
                job_definition_id,
                remote_id,
                unit_name,
                now_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Apply the agent's view of one execution. Unknown executions are
    /// inserted without a job definition link.
    #[instrument(skip(self, exec), fields(remote_id = %exec.remote_id, status = %exec.status))]
    pub fn upsert_execution(&self, project_id: i64, exec: &RemoteExecution) -> Result<()> {
        self.db().execute(
            "INSERT INTO job_executions
             (id, project_id, job_definition_id, remote_id, unit_name, status,
              started_at, finished_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(project_id, remote_id) DO UPDATE SET
                status      = excluded.status,
                started_at  = COALESCE(excluded.started_at, started_at),
                finished_at = COALESCE(excluded.finished_at, finished_at),
                updated_at  = excluded.updated_at",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                project_id,
                exec.remote_id,
                exec.unit_name,
                exec.status.as_str(),
                exec.started_at.map(to_rfc3339),
                exec.finished_at.map(to_rfc3339),
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn list_executions(&self, project_id: i64) -> Result<Vec<JobExecution>> {
        let db = self.db();
        let mut stmt = db.prepare(&format!(
            "{EXECUTION_SELECT_SQL} WHERE project_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([project_id], row_to_execution)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: ValidationError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

/// Map a row in JOB_SELECT_SQL column order to a JobDefinition.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobDefinition> {
    let run_type = row
        .get::<_, String>(4)?
        .parse::<RunType>()
        .map_err(|e| conversion_error(4, e))?;
    let modified_raw: String = row.get(12)?;
    let modified_at = DateTime::parse_from_rfc3339(&modified_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            conversion_error(
                12,
                ValidationError::InvalidTimestamp {
                    value: modified_raw.clone(),
                    reason: e.to_string(),
                },
            )
        })?;

    Ok(JobDefinition {
        id: row.get(0)?,
        project_id: row.get(1)?,
        unit_name: row.get(2)?,
        scheduled: row.get::<_, i64>(3)? != 0,
        run_type,
        cron: CronFields {
            minute: row.get(5)?,
            hour: row.get(6)?,
            day_of_month: row.get(7)?,
            day_of_week: row.get(8)?,
            month: row.get(9)?,
        },
        args: row.get(10)?,
        priority: row.get(11)?,
        modified_at,
    })
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobExecution> {
    let status = row
        .get::<_, String>(5)?
        .parse::<ExecutionStatus>()
        .map_err(|e| conversion_error(5, e))?;
    Ok(JobExecution {
        id: row.get(0)?,
        project_id: row.get(1)?,
        job_definition_id: row.get(2)?,
        remote_id: row.get(3)?,
        unit_name: row.get(4)?,
        status,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> JobStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        JobStore::new(conn)
    }

    fn project(store: &JobStore, name: &str) -> Project {
        store.insert_project_if_missing(name).unwrap();
        store
            .list_projects()
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
    }

    #[test]
    fn project_insert_is_idempotent() {
        let store = store();
        assert!(store.insert_project_if_missing("news").unwrap());
        assert!(!store.insert_project_if_missing("news").unwrap());
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn job_definition_round_trips_modified_time() {
        let store = store();
        let p = project(&store, "news");
        let modified = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut new = NewJobDefinition::periodic(p.id, "news_spider", CronFields::every_minute_matching("*/5"));
        new.modified_at = Some(modified);

        let job = store.insert_job_definition(&new).unwrap();
        assert_eq!(job.modified_at, modified);
        assert!(!job.scheduled);
        assert_eq!(job.run_type, RunType::Periodic);
        assert_eq!(job.cron.minute, "*/5");
        assert_eq!(job.entry_id().as_str(), format!("spider_job_{}:1704067200", job.id));
    }

    #[test]
    fn reconcilable_filter_excludes_scheduled_and_on_demand() {
        let store = store();
        let p = project(&store, "news");
        let periodic = store
            .insert_job_definition(&NewJobDefinition::periodic(p.id, "a", CronFields::default()))
            .unwrap();
        let flagged = store
            .insert_job_definition(&NewJobDefinition::periodic(p.id, "b", CronFields::default()))
            .unwrap();
        store.set_scheduled(flagged.id, true).unwrap();
        let mut on_demand = NewJobDefinition::periodic(p.id, "c", CronFields::default());
        on_demand.run_type = RunType::OnDemand;
        store.insert_job_definition(&on_demand).unwrap();

        let ids: Vec<i64> = store
            .list_job_definitions(&JobFilter::reconcilable())
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![periodic.id]);
        assert_eq!(store.list_job_definitions(&JobFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn missing_definition_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get_job_definition(42),
            Err(StoreError::JobNotFound { id: 42 })
        ));
        assert!(matches!(
            store.delete_job_definition(42),
            Err(StoreError::JobNotFound { id: 42 })
        ));
    }

    #[test]
    fn replace_units_reports_changes() {
        let store = store();
        let p = project(&store, "news");
        let first = store
            .replace_units(p.id, &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(first, UnitChanges { added: 2, removed: 0 });

        let second = store
            .replace_units(p.id, &["b".to_string(), "c".to_string()])
            .unwrap();
        assert_eq!(second, UnitChanges { added: 1, removed: 1 });
        assert_eq!(store.list_units(p.id).unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn status_sync_updates_started_execution() {
        let store = store();
        let p = project(&store, "news");
        store.record_started(p.id, Some(7), "news_spider", "abc123").unwrap();

        let started = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        store
            .upsert_execution(
                p.id,
                &RemoteExecution {
                    remote_id: "abc123".into(),
                    unit_name: "news_spider".into(),
                    status: ExecutionStatus::Running,
                    started_at: Some(started),
                    finished_at: None,
                },
            )
            .unwrap();

        let execs = store.list_executions(p.id).unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].status, ExecutionStatus::Running);
        assert_eq!(execs[0].job_definition_id, Some(7));
        assert!(execs[0].started_at.is_some());
    }

    #[test]
    fn status_sync_inserts_unknown_execution() {
        let store = store();
        let p = project(&store, "news");
        store
            .upsert_execution(
                p.id,
                &RemoteExecution {
                    remote_id: "external".into(),
                    unit_name: "other".into(),
                    status: ExecutionStatus::Finished,
                    started_at: None,
                    finished_at: None,
                },
            )
            .unwrap();
        let execs = store.list_executions(p.id).unwrap();
        assert_eq!(execs[0].job_definition_id, None);
        assert_eq!(execs[0].status, ExecutionStatus::Finished);
    }

    #[test]
    fn unreadable_definition_does_not_hide_the_rest() {
        let store = store();
        let p = project(&store, "news");
        let good = store
            .insert_job_definition(&NewJobDefinition::periodic(p.id, "a", CronFields::default()))
            .unwrap();
        let bad = store
            .insert_job_definition(&NewJobDefinition::periodic(p.id, "b", CronFields::default()))
            .unwrap();
        store
            .db()
            .execute(
                "UPDATE job_definitions SET modified_at = '2024-01-01 00:00:00' WHERE id = ?1",
                [bad.id],
            )
            .unwrap();

        let scan = store.scan_job_definitions(&JobFilter::reconcilable()).unwrap();
        assert_eq!(scan.jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![good.id]);
        assert_eq!(scan.rejected.len(), 1);
        assert_eq!(scan.rejected[0].id, bad.id);
        assert!(scan.rejected[0].reason.contains("invalid timestamp"));

        let listed = store.list_job_definitions(&JobFilter::reconcilable()).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn started_execution_keeps_id_of_synced_row() {
        let store = store();
        let p = project(&store, "news");
        store
            .upsert_execution(
                p.id,
                &RemoteExecution {
                    remote_id: "abc123".into(),
                    unit_name: "news_spider".into(),
                    status: ExecutionStatus::Running,
                    started_at: None,
                    finished_at: None,
                },
            )
            .unwrap();
        let synced_id = store.list_executions(p.id).unwrap()[0].id.clone();

        let id = store.record_started(p.id, Some(7), "news_spider", "abc123").unwrap();
        assert_eq!(id, synced_id);

        let execs = store.list_executions(p.id).unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].id, id);
        assert_eq!(execs[0].job_definition_id, Some(7));
        assert_eq!(execs[0].status, ExecutionStatus::Running);
    }
}
