use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::JobStore;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out per-task store scopes over one SQLite database file.
///
/// Every fired task acquires its own [`JobStore`] through [`scope`](Self::scope)
/// and releases it by dropping it, so concurrently running tasks never share a
/// connection. Cloning is cheap: only the path is held.
#[derive(Debug, Clone)]
pub struct StoreContext {
    path: PathBuf,
}

impl StoreContext {
    /// Prepare the database file (parent directory, WAL mode, schema).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Path {
                path: path.display().to_string(),
                source,
            })?;
        }

        let conn = open_connection(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_db(&conn)?;
        info!(path = %path.display(), "job store ready");

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh store scope. Dropping the returned store closes its connection.
    pub fn scope(&self) -> Result<JobStore> {
        let conn = open_connection(&self.path)?;
        debug!(path = %self.path.display(), "store scope opened");
        Ok(JobStore::new(conn))
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}
