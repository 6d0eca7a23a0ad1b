//! Status notifier
//!
//! Announces job lifecycle phases to two external sinks: a commit-status
//! API and a chat room. Announcements are best effort: sink failures are
//! logged and never change the outcome of a job.

use async_trait::async_trait;
use deployer_core::domain::job::Job;
use deployer_core::domain::phase::{Color, Phase};
use thiserror::Error;
use tracing::{info, warn};

/// Failure reported by a notification sink
#[derive(Debug, Error)]
#[error("{sink} sink failed: {message}")]
pub struct SinkError {
    pub sink: &'static str,
    pub message: String,
}

/// Receives every lifecycle phase of every job
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn observe(&self, job: &Job, phase: Phase);
}

/// Commit-status API of the source-control host
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_status(
        &self,
        owner: &str,
        name: &str,
        job_id: i64,
        phase: Phase,
        target_url: &str,
    ) -> Result<(), SinkError>;
}

/// Chat room receiving human-readable deploy messages
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, message: &str, color: Color) -> Result<(), SinkError>;
}

/// LifecycleObserver fanning each phase out to a status sink and a chat sink
pub struct Notifier<S, N> {
    host: String,
    status: S,
    chat: N,
}

impl<S: StatusSink, N: NotificationSink> Notifier<S, N> {
    /// `host` is the public base URL job links are built from
    pub fn new(host: impl Into<String>, status: S, chat: N) -> Self {
        let host = host.into().trim_end_matches('/').to_string();
        Self { host, status, chat }
    }

    /// Link to the job's page, addressed by its store id
    ///
    /// Jobs are persisted before their first announcement; an unsaved job
    /// links to the deployment list instead.
    pub fn target_url(&self, job: &Job) -> String {
        match job.id {
            Some(id) => format!("{}/deployment/{}", self.host, id),
            None => format!("{}/deployments", self.host),
        }
    }

    /// Chat line for a job entering `phase`
    pub fn message(&self, job: &Job, phase: Phase) -> String {
        format!(
            "{}: deployment #{} in {} ({}) to {} - {}",
            phase.title(),
            job.job_id,
            job.full_name(),
            job.git_ref,
            job.environment,
            self.target_url(job)
        )
    }
}

#[async_trait]
impl<S: StatusSink, N: NotificationSink> LifecycleObserver for Notifier<S, N> {
    async fn observe(&self, job: &Job, phase: Phase) {
        let target_url = self.target_url(job);
        let message = self.message(job, phase);

        let (status, chat) = tokio::join!(
            self.status
                .set_status(&job.owner, &job.name, job.job_id, phase, &target_url),
            self.chat.post(&message, phase.color()),
        );

        if let Err(e) = status {
            warn!("Failed to report {} for deploy #{}: {}", phase, job.job_id, e);
        }
        if let Err(e) = chat {
            warn!("Failed to announce {} for deploy #{}: {}", phase, job.job_id, e);
        }
    }
}

/// StatusSink that writes statuses to the log
#[derive(Debug, Default, Clone)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn set_status(
        &self,
        owner: &str,
        name: &str,
        job_id: i64,
        phase: Phase,
        target_url: &str,
    ) -> Result<(), SinkError> {
        info!(
            "Status of deploy #{} in {}/{} is {} ({})",
            job_id, owner, name, phase, target_url
        );
        Ok(())
    }
}

/// NotificationSink that writes messages to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn post(&self, message: &str, color: Color) -> Result<(), SinkError> {
        info!("[{}] {}", color, message);
        Ok(())
    }
}
