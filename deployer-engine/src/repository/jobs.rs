//! Jobs repository
//!
//! Persistence interface for job records and an in-memory implementation.

use async_trait::async_trait;
use deployer_core::domain::job::{Job, JobStatus};
use deployer_core::dto::job::Page;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update addressed a record that does not exist
    #[error("Job {0} not found in store")]
    NotFound(Uuid),

    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Repository trait for job records
///
/// Implementations must be safe for concurrent use by many job tasks.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts the record and assigns an id when it has none, otherwise
    /// replaces the record with that id
    ///
    /// Returns the record's id.
    async fn upsert(&self, job: &Job) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Jobs ordered newest first
    async fn list(&self, page: Page) -> Result<Vec<Job>, StoreError>;

    /// Most recently finished successful deploy of `owner/name`
    async fn last_successful(&self, owner: &str, name: &str) -> Result<Option<Job>, StoreError>;
}

/// In-memory implementation of JobStore
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &Job) -> Result<Uuid, StoreError> {
        let mut jobs = self.jobs.write().await;

        match job.id {
            None => {
                let id = Uuid::new_v4();
                let mut stored = job.clone();
                stored.id = Some(id);
                jobs.push(stored);
                Ok(id)
            }
            Some(id) => {
                let slot = jobs
                    .iter_mut()
                    .find(|stored| stored.id == Some(id))
                    .ok_or(StoreError::NotFound(id))?;
                *slot = job.clone();
                Ok(id)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.iter().find(|job| job.id == Some(id)).cloned())
    }

    async fn list(&self, page: Page) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;

        let mut listed: Vec<Job> = jobs.clone();
        listed.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(listed
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    async fn last_successful(&self, owner: &str, name: &str) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;

        Ok(jobs
            .iter()
            .filter(|job| {
                job.owner == owner && job.name == name && job.status == JobStatus::Success
            })
            .max_by_key(|job| job.finished_at)
            .cloned())
    }
}
