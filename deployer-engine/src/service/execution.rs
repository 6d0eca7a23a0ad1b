//! Execution service
//!
//! Runs one deploy job end to end:
//! - Building the sandbox parameters from the job record
//! - Acquiring the sandbox (optional image pull, then create)
//! - Starting it and blocking until it exits
//! - Capturing its combined output
//! - Tearing it down on every path once it exists
//!
//! The exit code is the only thing that decides between success and failure.
//! A cancel request that arrives before the sandbox runs is recorded and
//! honoured at the next step, so the job still ends as killed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deployer_core::domain::job::{Job, KILLED_EXIT_CODE};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sandbox::{
    Mount, ProviderError, SandboxGuard, SandboxHandle, SandboxProvider, SandboxSpec,
};

/// Path the SSH deploy key is mounted at inside the sandbox
pub const SSH_KEY_TARGET: &str = "/root/.ssh/id_rsa";

/// Sandbox settings shared by every job
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Image containing the deploy script
    pub image: String,

    /// Host path of the SSH private key handed to the deploy script
    pub ssh_key_path: PathBuf,

    /// Pull the image before creating each sandbox
    pub pull_image: bool,
}

/// What a finished (or aborted) sandbox left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// `None` when the sandbox never produced an exit code
    pub exit_code: Option<i32>,

    /// Combined stdout/stderr in emission order
    pub logs: Vec<u8>,

    /// When teardown began
    pub finished_at: DateTime<Utc>,
}

/// Ways an execution can end other than a zero exit code
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Another execution for the same job id is in flight
    #[error("Deploy #{job_id} is already running")]
    AlreadyRunning { job_id: i64 },

    /// The sandbox could not be created; nothing needs cleaning up
    #[error("Failed to provision sandbox {sandbox}: {source}")]
    Provision {
        sandbox: String,
        source: ProviderError,
    },

    #[error("Failed to start sandbox {sandbox}: {source}")]
    Start {
        sandbox: String,
        source: ProviderError,
        outcome: Outcome,
    },

    #[error("Failed waiting on sandbox {sandbox}: {source}")]
    Wait {
        sandbox: String,
        source: ProviderError,
        outcome: Outcome,
    },

    /// Cancelled before the sandbox ran; any created sandbox is torn down
    #[error("Deploy #{job_id} was cancelled before it started")]
    Cancelled { job_id: i64, outcome: Outcome },

    /// The deploy script ran and reported a problem
    #[error("Deploy #{job_id} failed with exit code \"{exit_code}\"")]
    Exit {
        job_id: i64,
        exit_code: i32,
        outcome: Outcome,
    },
}

impl ExecuteError {
    /// Outcome of the sandbox, for errors raised after it was acquired
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            ExecuteError::AlreadyRunning { .. } | ExecuteError::Provision { .. } => None,
            ExecuteError::Start { outcome, .. }
            | ExecuteError::Wait { outcome, .. }
            | ExecuteError::Cancelled { outcome, .. }
            | ExecuteError::Exit { outcome, .. } => Some(outcome),
        }
    }

    pub fn into_outcome(self) -> Option<Outcome> {
        match self {
            ExecuteError::AlreadyRunning { .. } | ExecuteError::Provision { .. } => None,
            ExecuteError::Start { outcome, .. }
            | ExecuteError::Wait { outcome, .. }
            | ExecuteError::Cancelled { outcome, .. }
            | ExecuteError::Exit { outcome, .. } => Some(outcome),
        }
    }
}

/// Service trait for executing deploy jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Runs the job's deploy script to completion
    async fn execute(&self, job: &Job) -> Result<Outcome, ExecuteError>;

    /// Stops the job's sandbox, which makes a pending `execute` return
    ///
    /// A job whose sandbox is not running yet is marked cancelled and never
    /// starts it.
    async fn cancel(&self, job: &Job) -> Result<(), ProviderError>;
}

/// Cancellation state of one job, shared by its execution and cancel requests
#[derive(Debug, Default)]
struct Signal {
    cancelled: AtomicBool,
    started: AtomicBool,
}

impl Signal {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Slot {
    running: bool,
    signal: Arc<Signal>,
}

/// Job ids with an execution in flight, or a cancel waiting for one
#[derive(Default)]
struct InFlight {
    jobs: Mutex<HashMap<i64, Slot>>,
}

impl InFlight {
    fn claim(self: &Arc<Self>, job_id: i64) -> Option<InFlightClaim> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = jobs.entry(job_id).or_default();
        if slot.running {
            return None;
        }

        slot.running = true;
        Some(InFlightClaim {
            registry: Arc::clone(self),
            job_id,
            signal: Arc::clone(&slot.signal),
        })
    }

    /// Marks the job cancelled, whether or not its execution has begun
    fn request_cancel(&self, job_id: i64) -> Arc<Signal> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = jobs.entry(job_id).or_default();
        slot.signal.cancelled.store(true, Ordering::SeqCst);
        Arc::clone(&slot.signal)
    }
}

/// Holds a job id in the in-flight registry until dropped
struct InFlightClaim {
    registry: Arc<InFlight>,
    job_id: i64,
    signal: Arc<Signal>,
}

impl InFlightClaim {
    fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    fn mark_started(&self) {
        self.signal.started.store(true, Ordering::SeqCst);
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut jobs = self
            .registry
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        jobs.remove(&self.job_id);
    }
}

/// ExecutionService that runs each job in its own sandbox
pub struct SandboxExecutionService {
    provider: Arc<dyn SandboxProvider>,
    config: ExecutorConfig,
    in_flight: Arc<InFlight>,
}

impl SandboxExecutionService {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: ExecutorConfig) -> Self {
        Self {
            provider,
            config,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Builds the sandbox parameters for a job
    ///
    /// The environment names are what deploy scripts read; keep them stable.
    pub fn sandbox_spec(&self, job: &Job) -> SandboxSpec {
        SandboxSpec {
            name: job.sandbox_name(),
            image: self.config.image.clone(),
            env: vec![
                ("DEPLOYER_ID".to_string(), job.job_id.to_string()),
                ("DEPLOYER_REPO".to_string(), job.ssh_url.clone()),
                ("DEPLOYER_TASK".to_string(), job.task.clone()),
                ("DEPLOYER_ENV".to_string(), job.environment.clone()),
                ("DEPLOYER_REF".to_string(), job.git_ref.clone()),
                ("DEPLOYER_SHA".to_string(), job.sha.clone()),
            ],
            mounts: vec![Mount {
                source: self.config.ssh_key_path.clone(),
                target: SSH_KEY_TARGET.to_string(),
                read_only: true,
            }],
        }
    }

    fn cancelled(job: &Job, finished_at: DateTime<Utc>) -> ExecuteError {
        info!("Deploy #{} cancelled before its sandbox started", job.job_id);
        ExecuteError::Cancelled {
            job_id: job.job_id,
            outcome: Outcome {
                exit_code: Some(KILLED_EXIT_CODE),
                logs: Vec::new(),
                finished_at,
            },
        }
    }

    /// Reads the sandbox's output into one ordered buffer
    ///
    /// Failures are logged and yield whatever was read so far.
    async fn capture(&self, handle: &SandboxHandle) -> Vec<u8> {
        let mut logs = Vec::new();

        let mut frames = match self.provider.logs(handle, false).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Failed to read output of sandbox {}: {}", handle.name(), e);
                return logs;
            }
        };

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => logs.extend_from_slice(&frame.data),
                Err(e) => {
                    warn!(
                        "Output of sandbox {} truncated after {} bytes: {}",
                        handle.name(),
                        logs.len(),
                        e
                    );
                    break;
                }
            }
        }

        debug!("Captured {} bytes from sandbox {}", logs.len(), handle.name());
        logs
    }
}

#[async_trait]
impl ExecutionService for SandboxExecutionService {
    async fn execute(&self, job: &Job) -> Result<Outcome, ExecuteError> {
        let claim = self
            .in_flight
            .claim(job.job_id)
            .ok_or(ExecuteError::AlreadyRunning { job_id: job.job_id })?;

        let spec = self.sandbox_spec(job);
        let sandbox = spec.name.clone();
        let provision_failed = |source| ExecuteError::Provision {
            sandbox: sandbox.clone(),
            source,
        };

        if claim.is_cancelled() {
            return Err(Self::cancelled(job, Utc::now()));
        }

        if self.config.pull_image {
            self.provider
                .pull_image(&spec.image)
                .await
                .map_err(provision_failed)?;

            if claim.is_cancelled() {
                return Err(Self::cancelled(job, Utc::now()));
            }
        }

        let handle = self.provider.create(&spec).await.map_err(provision_failed)?;
        let guard = SandboxGuard::new(Arc::clone(&self.provider), handle);

        info!("Sandbox {} created for deploy #{}", sandbox, job.job_id);

        if claim.is_cancelled() {
            let finished_at = guard.release().await;
            return Err(Self::cancelled(job, finished_at));
        }

        if let Err(source) = self.provider.start(guard.handle()).await {
            let finished_at = guard.release().await;
            return Err(ExecuteError::Start {
                sandbox,
                source,
                outcome: Outcome {
                    exit_code: None,
                    logs: Vec::new(),
                    finished_at,
                },
            });
        }

        claim.mark_started();

        // A cancel that raced with start may have found nothing to stop
        if claim.is_cancelled() {
            if let Err(e) = self.provider.stop(guard.handle()).await {
                warn!("Failed to stop cancelled sandbox {}: {}", sandbox, e);
            }
        }

        debug!("Sandbox {} started, waiting for exit", sandbox);

        let waited = self.provider.wait(guard.handle()).await;
        let logs = self.capture(guard.handle()).await;
        let finished_at = guard.release().await;

        match waited {
            Err(source) => Err(ExecuteError::Wait {
                sandbox,
                source,
                outcome: Outcome {
                    exit_code: None,
                    logs,
                    finished_at,
                },
            }),
            Ok(0) => Ok(Outcome {
                exit_code: Some(0),
                logs,
                finished_at,
            }),
            Ok(exit_code) => Err(ExecuteError::Exit {
                job_id: job.job_id,
                exit_code,
                outcome: Outcome {
                    exit_code: Some(exit_code),
                    logs,
                    finished_at,
                },
            }),
        }
    }

    async fn cancel(&self, job: &Job) -> Result<(), ProviderError> {
        let signal = self.in_flight.request_cancel(job.job_id);
        let handle = SandboxHandle::new(job.sandbox_name());
        info!("Cancelling deploy #{} (sandbox {})", job.job_id, handle.name());

        match self.provider.stop(&handle).await {
            Err(e) if !signal.is_started() => {
                debug!(
                    "Sandbox {} not running yet ({}), deploy #{} will stop before it starts",
                    handle.name(),
                    e,
                    job.job_id
                );
                Ok(())
            }
            result => result,
        }
    }
}
