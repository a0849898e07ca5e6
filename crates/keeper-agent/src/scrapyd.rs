use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use keeper_core::{ExecutionStatus, JobDefinition, Project, RemoteExecution};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agent::{AgentError, ExecutionAgent};

/// Scrapyd-compatible execution agent over its JSON HTTP API.
pub struct ScrapydAgent {
    client: reqwest::Client,
    base_url: String,
}

impl ScrapydAgent {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AgentError> {
        debug!(agent = %self.base_url, path, "agent GET");
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(map_send_error)?;
        decode(resp).await
    }
}

#[async_trait]
impl ExecutionAgent for ScrapydAgent {
    fn name(&self) -> &str {
        "scrapyd"
    }

    async fn list_projects(&self) -> Result<Vec<String>, AgentError> {
        let body: ProjectsResponse = self.get("listprojects.json", &[]).await?;
        Ok(body.projects)
    }

    async fn list_units(&self, project: &Project) -> Result<Vec<String>, AgentError> {
        let body: SpidersResponse = self
            .get("listspiders.json", &[("project", project.name.as_str())])
            .await?;
        Ok(body.spiders)
    }

    async fn start_unit(
        &self,
        project: &Project,
        job: &JobDefinition,
    ) -> Result<String, AgentError> {
        let form = schedule_form(project, job)?;
        debug!(agent = %self.base_url, project = %project.name, unit = %job.unit_name, "agent schedule");
        let resp = self
            .client
            .post(self.url("schedule.json"))
            .form(&form)
            .send()
            .await
            .map_err(map_send_error)?;
        let body: ScheduleResponse = decode(resp).await?;
        Ok(body.jobid)
    }

    async fn list_statuses(&self, project: &Project) -> Result<Vec<RemoteExecution>, AgentError> {
        let body: JobsResponse = self
            .get("listjobs.json", &[("project", project.name.as_str())])
            .await?;
        Ok(body.into_executions())
    }
}

/// Surface connection errors as Unavailable; everything else stays an HTTP error.
fn map_send_error(e: reqwest::Error) -> AgentError {
    if e.is_connect() || e.is_timeout() {
        AgentError::Unavailable(e.to_string())
    } else {
        AgentError::Http(e)
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AgentError> {
    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "agent API error");
        return Err(AgentError::Api {
            status,
            message: text,
        });
    }
    let text = resp.text().await.map_err(map_send_error)?;
    parse_body(&text)
}

/// Every Scrapyd payload carries `status`; anything but `ok` is a remote failure.
fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| AgentError::Parse(e.to_string()))?;
    if envelope.status != "ok" {
        return Err(AgentError::Remote(
            envelope
                .message
                .unwrap_or_else(|| format!("status {}", envelope.status)),
        ));
    }
    serde_json::from_str(text).map_err(|e| AgentError::Parse(e.to_string()))
}

fn schedule_form(
    project: &Project,
    job: &JobDefinition,
) -> Result<Vec<(String, String)>, AgentError> {
    let mut form = vec![
        ("project".to_string(), project.name.clone()),
        ("spider".to_string(), job.unit_name.clone()),
    ];
    if job.priority != 0 {
        form.push(("priority".to_string(), job.priority.to_string()));
    }
    if let Some(ref args) = job.args {
        form.extend(parse_args(args)?);
    }
    Ok(form)
}

/// Split `key=value,key2=value2` into form pairs. Blank items are skipped.
fn parse_args(raw: &str) -> Result<Vec<(String, String)>, AgentError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(AgentError::Parse(format!("malformed job argument {item:?}"))),
        })
        .collect()
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    #[serde(default)]
    projects: Vec<String>,
}

#[derive(Deserialize)]
struct SpidersResponse {
    #[serde(default)]
    spiders: Vec<String>,
}

#[derive(Deserialize)]
struct ScheduleResponse {
    jobid: String,
}

#[derive(Deserialize)]
struct JobsResponse {
    #[serde(default)]
    pending: Vec<JobEntry>,
    #[serde(default)]
    running: Vec<JobEntry>,
    #[serde(default)]
    finished: Vec<JobEntry>,
}

#[derive(Deserialize)]
struct JobEntry {
    id: String,
    spider: String,
    start_time: Option<String>,
    end_time: Option<String>,
}

impl JobsResponse {
    fn into_executions(self) -> Vec<RemoteExecution> {
        let tag = |entries: Vec<JobEntry>, status: ExecutionStatus| {
            entries.into_iter().map(move |e| RemoteExecution {
                remote_id: e.id,
                unit_name: e.spider,
                status,
                started_at: e.start_time.as_deref().and_then(parse_agent_time),
                finished_at: e.end_time.as_deref().and_then(parse_agent_time),
            })
        };
        tag(self.pending, ExecutionStatus::Pending)
            .chain(tag(self.running, ExecutionStatus::Running))
            .chain(tag(self.finished, ExecutionStatus::Finished))
            .collect()
    }
}

/// Scrapyd reports naive `YYYY-mm-dd HH:MM:SS[.ffffff]` times; they are taken as UTC.
fn parse_agent_time(raw: &str) -> Option<DateTime<Utc>> {
    match NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            warn!(raw, "unparseable agent timestamp: {e}");
            None
        }
    }
}
