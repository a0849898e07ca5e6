use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron_fields::CronFields;
use crate::error::ValidationError;

/// Prefix shared by every schedule entry derived from a job definition.
///
/// Entries without this prefix (system tasks) are never touched by the reconciler.
pub const SCHEDULE_NAMESPACE: &str = "spider_job_";

/// A project known to the execution agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    /// Project name as the agent knows it.
    pub name: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

/// How a job definition is meant to be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunType {
    /// Fired by the scheduler according to the definition's cron fields.
    Periodic,
    /// Started explicitly by an operator.
    OnDemand,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Periodic => "periodic",
            RunType::OnDemand => "on-demand",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "periodic" => Ok(RunType::Periodic),
            "on-demand" | "onetime" => Ok(RunType::OnDemand),
            other => Err(ValidationError::UnknownRunType(other.to_string())),
        }
    }
}

/// A persisted recurring (or on-demand) job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: i64,
    pub project_id: i64,
    /// Name of the unit of work (spider) the agent should start.
    pub unit_name: String,
    /// Scheduling-state flag: `false` means the definition is still in its
    /// pre-scheduled state and is reconciled into the live schedule.
    pub scheduled: bool,
    pub run_type: RunType,
    pub cron: CronFields,
    /// Extra arguments forwarded to the agent, `key=value` pairs separated by commas.
    pub args: Option<String>,
    pub priority: i32,
    pub modified_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Derived live-schedule identifier for this definition version.
    pub fn entry_id(&self) -> ScheduleEntryId {
        ScheduleEntryId::new(self.id, self.modified_at)
    }
}

/// Identifier of a live schedule entry derived from a job definition.
///
/// Format: `spider_job_{id}:{epoch_secs}` where `epoch_secs` is the
/// floor-to-second Unix time of the definition's last modification. Any edit
/// that bumps the modification time yields a different identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleEntryId(String);

impl ScheduleEntryId {
    pub fn new(job_id: i64, modified_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{SCHEDULE_NAMESPACE}{job_id}:{}",
            modified_at.timestamp()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether a raw entry id belongs to the job-definition namespace.
    pub fn is_namespaced(id: &str) -> bool {
        id.starts_with(SCHEDULE_NAMESPACE)
    }
}

impl fmt::Display for ScheduleEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ScheduleEntryId> for String {
    fn from(id: ScheduleEntryId) -> Self {
        id.0
    }
}

/// Lifecycle state of one remote execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Finished => "finished",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "finished" => Ok(ExecutionStatus::Finished),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(ValidationError::UnknownExecutionStatus(other.to_string())),
        }
    }
}

/// An execution as reported by the agent's live status listing.
///
/// Shared between the agent client (producer) and the store (consumer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteExecution {
    /// Identifier the agent assigned when the unit was started.
    pub remote_id: String,
    pub unit_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A stored execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecution {
    /// UUIDv7 primary key.
    pub id: String,
    pub project_id: i64,
    /// `None` for executions the agent reported but this process never started.
    pub job_definition_id: Option<i64>,
    pub remote_id: String,
    pub unit_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}
