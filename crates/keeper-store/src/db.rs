use rusqlite::{Connection, Result};

/// Initialise every table of the job store. Safe to call on every startup:
/// CREATE IF NOT EXISTS keeps it idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_projects_table(conn)?;
    create_job_definitions_table(conn)?;
    create_units_table(conn)?;
    create_job_executions_table(conn)?;
    Ok(())
}

fn create_projects_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );",
    )
}

fn create_job_definitions_table(conn: &Connection) -> Result<()> {
    // `scheduled = 0` marks a definition still in its pre-scheduled state;
    // only those (with run_type 'periodic') are reconciled into the live schedule.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS job_definitions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id          INTEGER NOT NULL REFERENCES projects(id),
            unit_name           TEXT NOT NULL,
            scheduled           INTEGER NOT NULL DEFAULT 0,
            run_type            TEXT NOT NULL DEFAULT 'periodic',
            cron_minutes        TEXT NOT NULL DEFAULT '0',
            cron_hour           TEXT NOT NULL DEFAULT '*',
            cron_day_of_month   TEXT NOT NULL DEFAULT '*',
            cron_day_of_week    TEXT NOT NULL DEFAULT '*',
            cron_month          TEXT NOT NULL DEFAULT '*',
            args                TEXT,
            priority            INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            modified_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_job_definitions_reconcile
            ON job_definitions (run_type, scheduled);",
    )
}

fn create_units_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS units (
            project_id  INTEGER NOT NULL REFERENCES projects(id),
            name        TEXT NOT NULL,
            synced_at   TEXT NOT NULL,
            PRIMARY KEY (project_id, name)
        );",
    )
}

fn create_job_executions_table(conn: &Connection) -> Result<()> {
    // UNIQUE(project_id, remote_id) lets status sync upsert by the agent's id.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS job_executions (
            id                  TEXT PRIMARY KEY NOT NULL,
            project_id          INTEGER NOT NULL REFERENCES projects(id),
            job_definition_id   INTEGER,
            remote_id           TEXT NOT NULL,
            unit_name           TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'pending',
            started_at          TEXT,
            finished_at         TEXT,
            updated_at          TEXT NOT NULL,
            UNIQUE(project_id, remote_id)
        );
        CREATE INDEX IF NOT EXISTS idx_job_executions_project
            ON job_executions (project_id, updated_at);",
    )
}
