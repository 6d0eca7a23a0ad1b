//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::commit::{ChangedFile, Commit};
use crate::dto::deploy::DeployRequest;

/// Prefix of every sandbox name; the external job id is appended to it
pub const SANDBOX_PREFIX: &str = "deployer_";

/// Exit code a sandbox reports after being stopped with an immediate kill
///
/// Cancelled jobs end up `Failed` with this code.
pub const KILLED_EXIT_CODE: i32 = 137;

/// Derives the sandbox name for an external job id
pub fn sandbox_name(job_id: i64) -> String {
    format!("{}{}", SANDBOX_PREFIX, job_id)
}

/// Identity of the user who triggered a deploy or authored a commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub html_url: String,
}

/// Deploy attempt record
///
/// Created by the coordinator when a deploy is requested, persisted before
/// and after execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned identifier, `None` until the record is first persisted
    pub id: Option<Uuid>,

    /// External deployment id supplied by the event source
    pub job_id: i64,

    pub owner: String,
    pub name: String,
    pub ssh_url: String,
    pub http_url: String,
    pub task: String,
    pub environment: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub author: Actor,

    /// Commits since the last successful deploy of the same repository
    #[serde(default)]
    pub commits: Vec<Commit>,

    /// Files changed since the last successful deploy of the same repository
    #[serde(default)]
    pub files: Vec<ChangedFile>,

    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,

    /// Combined stdout/stderr of the deploy script, filled once terminal
    #[serde(default, skip_serializing)]
    pub logs: Vec<u8>,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
}

/// Attempted to move a job out of a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deploy #{job_id} is already {status}")]
pub struct TransitionError {
    pub job_id: i64,
    pub status: JobStatus,
}

/// Persisted status string that does not name a known status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl Job {
    /// Builds a fresh `Pending` record from a deploy request
    pub fn pending(req: DeployRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            job_id: req.job_id,
            owner: req.owner,
            name: req.name,
            ssh_url: req.ssh_url,
            http_url: req.http_url,
            task: req.task,
            environment: req.environment,
            git_ref: req.git_ref,
            sha: req.sha,
            author: req.author,
            commits: Vec::new(),
            files: Vec::new(),
            status: JobStatus::Pending,
            started_at,
            finished_at: None,
            exit_code: None,
            logs: Vec::new(),
        }
    }

    /// Name of the sandbox this job runs in
    pub fn sandbox_name(&self) -> String {
        sandbox_name(self.job_id)
    }

    /// `owner/name` of the deployed repository
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job to its terminal state
    ///
    /// The status is derived from the exit code: `Some(0)` is the only
    /// successful outcome, anything else (including no exit code at all,
    /// as after a provisioning error) is a failure.
    pub fn finish(
        &mut self,
        exit_code: Option<i32>,
        logs: Vec<u8>,
        finished_at: DateTime<Utc>,
    ) -> Result<JobStatus, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                job_id: self.job_id,
                status: self.status,
            });
        }

        self.status = match exit_code {
            Some(0) => JobStatus::Success,
            _ => JobStatus::Failed,
        };
        self.exit_code = exit_code;
        self.logs = logs;
        self.finished_at = Some(finished_at);

        Ok(self.status)
    }

    /// Wall-clock runtime, once the job is terminal
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|finished| finished - self.started_at)
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Success => "Success",
            JobStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Success" => Ok(JobStatus::Success),
            "Failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeployRequest {
        DeployRequest {
            job_id: 42,
            owner: "acme".to_string(),
            name: "api".to_string(),
            ssh_url: "git@github.com:acme/api.git".to_string(),
            http_url: "https://github.com/acme/api".to_string(),
            task: "deploy".to_string(),
            environment: "prod".to_string(),
            git_ref: "main".to_string(),
            sha: "0a1b2c".to_string(),
            author: Actor {
                login: "octocat".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_pending_job_has_no_outcome() {
        let job = Job::pending(request(), Utc::now());

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.id.is_none());
        assert!(job.finished_at.is_none());
        assert!(job.exit_code.is_none());
        assert!(job.logs.is_empty());
        assert_eq!(job.sandbox_name(), "deployer_42");
        assert_eq!(job.full_name(), "acme/api");
    }

    #[test]
    fn test_finish_maps_exit_code_to_status() {
        let mut ok = Job::pending(request(), Utc::now());
        assert_eq!(
            ok.finish(Some(0), b"done\n".to_vec(), Utc::now()),
            Ok(JobStatus::Success)
        );
        assert_eq!(ok.exit_code, Some(0));
        assert!(ok.finished_at.is_some());

        let mut failed = Job::pending(request(), Utc::now());
        assert_eq!(
            failed.finish(Some(2), Vec::new(), Utc::now()),
            Ok(JobStatus::Failed)
        );

        let mut unprovisioned = Job::pending(request(), Utc::now());
        assert_eq!(
            unprovisioned.finish(None, Vec::new(), Utc::now()),
            Ok(JobStatus::Failed)
        );
        assert!(unprovisioned.exit_code.is_none());
    }

    #[test]
    fn test_finish_twice_is_rejected() {
        let mut job = Job::pending(request(), Utc::now());
        let first = Utc::now();
        job.finish(Some(1), b"boom".to_vec(), first).unwrap();

        let err = job.finish(Some(0), Vec::new(), Utc::now()).unwrap_err();
        assert_eq!(err.status, JobStatus::Failed);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(1));
        assert_eq!(job.logs, b"boom");
        assert_eq!(job.finished_at, Some(first));
    }

    #[test]
    fn test_status_parsing_rejects_unknown_values() {
        assert_eq!("Success".parse::<JobStatus>(), Ok(JobStatus::Success));
        assert_eq!("Pending".parse::<JobStatus>(), Ok(JobStatus::Pending));
        assert!("error".parse::<JobStatus>().is_err());
        assert!("".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_logs_are_not_serialized() {
        let mut job = Job::pending(request(), Utc::now());
        job.finish(Some(0), b"secret output".to_vec(), Utc::now())
            .unwrap();

        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("logs").is_none());
        assert_eq!(json["ref"], "main");
        assert_eq!(json["status"], "Success");
    }
}
