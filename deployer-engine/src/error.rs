//! Errors returned by the engine's operator-facing operations

use deployer_core::domain::job::JobStatus;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::StoreError;
use crate::sandbox::ProviderError;

/// Error type for job lookups, cancellation and log reads
#[derive(Debug, Error)]
pub enum JobError {
    /// No job with this id exists
    #[error("Job {0} not found")]
    NotFound(Uuid),

    /// The job already reached a terminal state
    #[error("Deploy #{job_id} is already {status}")]
    AlreadyTerminal {
        id: Uuid,
        job_id: i64,
        status: JobStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl JobError {
    /// Usage errors are the caller's fault and leave every job untouched
    pub fn is_usage_error(&self) -> bool {
        matches!(self, JobError::NotFound(_) | JobError::AlreadyTerminal { .. })
    }
}
