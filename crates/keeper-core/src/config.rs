use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AGENT_URL: &str = "http://localhost:6800";
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TICK_MILLIS: u64 = 1_000;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 60 * 60; // tolerate an hour of engine lag
pub const DEFAULT_MAX_INSTANCES: usize = 999; // effectively unbounded overlap
pub const DEFAULT_SYNC_PROJECTS_SECS: u64 = 10;
pub const DEFAULT_SYNC_STATUS_SECS: u64 = 5;
pub const DEFAULT_SYNC_UNITS_SECS: u64 = 10;
pub const DEFAULT_RECONCILE_SECS: u64 = 30;

/// Top-level config (keeper.toml + KEEPER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Connection settings for the remote execution agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL without trailing slash, e.g. `http://crawler-01:6800`.
    #[serde(default = "default_agent_url")]
    pub base_url: String,
    /// Per-request timeout applied to every agent call.
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_url(),
            timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
        }
    }
}

/// Engine cadence and the fixed intervals of the system tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the engine checks for due entries.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Misfire grace applied to entries derived from job definitions.
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
    /// Concurrent-instance ceiling for entries derived from job definitions.
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    #[serde(default = "default_sync_projects")]
    pub sync_projects_secs: u64,
    #[serde(default = "default_sync_status")]
    pub sync_status_secs: u64,
    #[serde(default = "default_sync_units")]
    pub sync_units_secs: u64,
    #[serde(default = "default_reconcile")]
    pub reconcile_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: DEFAULT_TICK_MILLIS,
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
            max_instances: DEFAULT_MAX_INSTANCES,
            sync_projects_secs: DEFAULT_SYNC_PROJECTS_SECS,
            sync_status_secs: DEFAULT_SYNC_STATUS_SECS,
            sync_units_secs: DEFAULT_SYNC_UNITS_SECS,
            reconcile_secs: DEFAULT_RECONCILE_SECS,
        }
    }
}

fn default_agent_url() -> String {
    DEFAULT_AGENT_URL.to_string()
}
fn default_agent_timeout() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}
fn default_tick_millis() -> u64 {
    DEFAULT_TICK_MILLIS
}
fn default_misfire_grace() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_max_instances() -> usize {
    DEFAULT_MAX_INSTANCES
}
fn default_sync_projects() -> u64 {
    DEFAULT_SYNC_PROJECTS_SECS
}
fn default_sync_status() -> u64 {
    DEFAULT_SYNC_STATUS_SECS
}
fn default_sync_units() -> u64 {
    DEFAULT_SYNC_UNITS_SECS
}
fn default_reconcile() -> u64 {
    DEFAULT_RECONCILE_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keeper/keeper.db", home)
}

impl KeeperConfig {
    /// Load config from a TOML file with KEEPER_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise `~/.keeper/keeper.toml`.
    /// A missing file is not an error: every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: KeeperConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KEEPER_").split("__"))
            .extract()
            .map_err(|e| crate::error::KeeperError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keeper/keeper.toml", home)
}
