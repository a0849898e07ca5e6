use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keeper_core::{CronFields, ValidationError};

/// Defines when an entry fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fire every `every`, first at add time + `every`.
    Interval { every: Duration },

    /// Fire on a cron schedule. `expression` is the five-field source text.
    Cron {
        expression: String,
        schedule: cron::Schedule,
    },
}

impl Trigger {
    pub fn every(every: Duration) -> Self {
        Trigger::Interval { every }
    }

    /// Validate stored cron fields into a trigger (second pinned to `0`).
    pub fn cron(fields: &CronFields) -> Result<Self, ValidationError> {
        let schedule = fields.schedule()?;
        Ok(Trigger::Cron {
            expression: fields.to_string(),
            schedule,
        })
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { every } => write!(f, "interval[{}s]", every.as_secs_f64()),
            Trigger::Cron { expression, .. } => write!(f, "cron[{expression}]"),
        }
    }
}

/// Per-entry firing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOptions {
    /// How late a run time may be launched before it counts as misfired.
    pub misfire_grace: Duration,
    /// Ceiling on concurrently running instances of this entry.
    pub max_instances: usize,
    /// Collapse several overdue run times into a single launch.
    pub coalesce: bool,
    /// Overwrite a live entry with the same id instead of failing.
    pub replace_existing: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            misfire_grace: Duration::from_secs(1),
            max_instances: 1,
            coalesce: true,
            replace_existing: false,
        }
    }
}

/// Result of one run of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
}

impl RunOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Point-in-time view of a live entry.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub id: String,
    /// Human-readable trigger, e.g. `cron[*/5 * * * *]`.
    pub trigger: String,
    pub next_fire: Option<DateTime<Utc>>,
    /// Instances in flight right now.
    pub running: usize,
    /// Finished runs, successful or not.
    pub runs: u64,
    pub failures: u64,
    /// Run times dropped because they fell outside the misfire grace.
    pub misfired: u64,
    pub last_outcome: Option<RunOutcome>,
    pub options: EntryOptions,
}
