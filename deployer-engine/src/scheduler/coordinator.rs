//! Deployment coordinator
//!
//! Owns the lifecycle of every deploy job:
//! build the Pending record, enrich it, persist it, announce it, execute
//! it, record the outcome, announce the terminal phase, persist again.
//! Each deploy runs in its own task.

use chrono::Utc;
use deployer_core::domain::job::Job;
use deployer_core::domain::phase::Phase;
use deployer_core::dto::deploy::DeployRequest;
use deployer_core::dto::job::Page;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::repository::{DiffSource, JobStore};
use crate::service::{ExecutionService, LifecycleObserver, Outcome};

/// Pause before the terminal record is written a second time
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Entry point for deploy requests and operator actions on jobs
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn ExecutionService>,
    observer: Arc<dyn LifecycleObserver>,
    diff_source: Option<Arc<dyn DiffSource>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn ExecutionService>,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Self {
        Self {
            store,
            executor,
            observer,
            diff_source: None,
        }
    }

    /// Enriches new jobs with the changes since the last successful deploy
    pub fn with_diff_source(mut self, diff_source: Arc<dyn DiffSource>) -> Self {
        self.diff_source = Some(diff_source);
        self
    }

    /// Runs a deploy in the background
    ///
    /// Returns immediately; the handle only matters to callers that want
    /// to wait for the job (tests, graceful shutdown).
    pub fn start_deploy(&self, req: DeployRequest) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        let job_id = req.job_id;

        tokio::spawn(async move {
            if let Err(e) = coordinator.run(req).await {
                error!("Deploy #{} aborted: {}", job_id, e);
            }
        })
    }

    /// Runs a deploy to completion and returns the terminal record
    ///
    /// Fails only when the record cannot be persisted. A failed initial
    /// persist abandons the job before anything runs; the terminal record
    /// gets one retry.
    pub async fn run(&self, req: DeployRequest) -> Result<Job, JobError> {
        let mut job = Job::pending(req, Utc::now());
        self.enrich(&mut job).await;

        job.id = Some(self.store.upsert(&job).await?);
        info!("Deploy #{} started", job.job_id);
        debug!(
            "Deploy #{}: {} {} to {} at {} ({})",
            job.job_id,
            job.task,
            job.full_name(),
            job.environment,
            job.git_ref,
            job.sha
        );

        self.observer.observe(&job, Phase::Pending).await;

        let outcome = match self.executor.execute(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{}", e);
                e.into_outcome().unwrap_or_else(|| Outcome {
                    exit_code: None,
                    logs: Vec::new(),
                    finished_at: Utc::now(),
                })
            }
        };

        match job.finish(outcome.exit_code, outcome.logs, outcome.finished_at) {
            Ok(status) => info!("Deploy #{} finished: {}", job.job_id, status),
            Err(e) => error!("Unexpected transition: {}", e),
        }
        if let Some(duration) = job.duration() {
            info!(
                "Deploy #{} took {:.1}s",
                job.job_id,
                duration.num_milliseconds() as f64 / 1000.0
            );
        }

        self.observer.observe(&job, Phase::from(job.status)).await;

        self.persist_terminal(&job).await?;
        Ok(job)
    }

    /// Writes the terminal record, retrying once
    ///
    /// When both attempts fail the full terminal state is logged so the
    /// record can be repaired by hand.
    async fn persist_terminal(&self, job: &Job) -> Result<(), JobError> {
        let Err(first) = self.store.upsert(job).await else {
            return Ok(());
        };

        warn!(
            "Failed to record deploy #{} as {}, retrying: {}",
            job.job_id, job.status, first
        );
        tokio::time::sleep(PERSIST_RETRY_DELAY).await;

        match self.store.upsert(job).await {
            Ok(_) => {
                info!("Deploy #{} recorded as {} on retry", job.job_id, job.status);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Deploy #{} left Pending in the store: id={:?} status={} exit_code={:?} \
                     started_at={} finished_at={:?} logs={} bytes",
                    job.job_id,
                    job.id,
                    job.status,
                    job.exit_code,
                    job.started_at,
                    job.finished_at,
                    job.logs.len()
                );
                Err(e.into())
            }
        }
    }

    /// Fills commits and changed files; every failure is non-fatal
    async fn enrich(&self, job: &mut Job) {
        let Some(diff_source) = &self.diff_source else {
            return;
        };

        let previous = match self.store.last_successful(&job.owner, &job.name).await {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                debug!("No previous successful deploy of {}", job.full_name());
                return;
            }
            Err(e) => {
                warn!("Failed to look up previous deploy of {}: {}", job.full_name(), e);
                return;
            }
        };

        match diff_source
            .compare(&job.owner, &job.name, &previous.sha, &job.sha)
            .await
        {
            Ok(diff) => {
                debug!(
                    "Deploy #{} carries {} commit(s) and {} changed file(s) since deploy #{}",
                    job.job_id,
                    diff.commits.len(),
                    diff.files.len(),
                    previous.job_id
                );
                job.commits = diff.commits;
                job.files = diff.files;
            }
            Err(e) => warn!("Failed to enrich deploy #{}: {}", job.job_id, e),
        }
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, JobError> {
        self.store.get(id).await?.ok_or(JobError::NotFound(id))
    }

    /// Jobs newest first
    pub async fn list_jobs(&self, page: Page) -> Result<Vec<Job>, JobError> {
        Ok(self.store.list(page.clamped()).await?)
    }

    /// Stops the sandbox of a pending job
    ///
    /// The job's own task observes the killed exit code and records the
    /// failure; this call never touches the record. A job still being
    /// provisioned is stopped before its sandbox starts.
    pub async fn cancel_job(&self, id: Uuid) -> Result<(), JobError> {
        let job = self.get_job(id).await?;

        if job.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id,
                job_id: job.job_id,
                status: job.status,
            });
        }

        self.executor.cancel(&job).await?;
        Ok(())
    }
}
