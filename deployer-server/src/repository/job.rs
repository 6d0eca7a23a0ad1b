//! Job Repository
//!
//! PostgreSQL implementation of the engine's job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deployer_core::domain::commit::{ChangedFile, Commit};
use deployer_core::domain::job::{Actor, Job, JobStatus};
use deployer_core::dto::job::Page;
use deployer_engine::repository::{JobStore, StoreError};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

const COLUMNS: &str = r#"
    id, job_id, owner, name, ssh_url, http_url, task, environment, git_ref, sha,
    author, commits, files, status, started_at, finished_at, exit_code, logs
"#;

/// JobStore backed by the `deployments` table
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, id: Uuid, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, job_id, owner, name, ssh_url, http_url, task, environment, git_ref, sha,
                author, commits, files, status, started_at, finished_at, exit_code, logs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(id)
        .bind(job.job_id)
        .bind(&job.owner)
        .bind(&job.name)
        .bind(&job.ssh_url)
        .bind(&job.http_url)
        .bind(&job.task)
        .bind(&job.environment)
        .bind(&job.git_ref)
        .bind(&job.sha)
        .bind(Json(&job.author))
        .bind(Json(&job.commits))
        .bind(Json(&job.files))
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.exit_code)
        .bind(&job.logs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rewrites the mutable fields of a record; returns false when no row matched
    async fn update(&self, id: Uuid, job: &Job) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET commits = $1, files = $2, status = $3, finished_at = $4, exit_code = $5, logs = $6
            WHERE id = $7
            "#,
        )
        .bind(Json(&job.commits))
        .bind(Json(&job.files))
        .bind(job.status.as_str())
        .bind(job.finished_at)
        .bind(job.exit_code)
        .bind(&job.logs)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert(&self, job: &Job) -> Result<Uuid, StoreError> {
        match job.id {
            None => {
                let id = Uuid::new_v4();
                self.insert(id, job).await.map_err(backend)?;
                Ok(id)
            }
            Some(id) => {
                if self.update(id, job).await.map_err(backend)? {
                    Ok(id)
                } else {
                    Err(StoreError::NotFound(id))
                }
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM deployments WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Job::try_from).transpose()
    }

    async fn list(&self, page: Page) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM deployments ORDER BY started_at DESC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn last_successful(&self, owner: &str, name: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM deployments
            WHERE owner = $1 AND name = $2 AND status = $3
            ORDER BY finished_at DESC
            LIMIT 1
            "#,
            COLUMNS
        ))
        .bind(owner)
        .bind(name)
        .bind(JobStatus::Success.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Job::try_from).transpose()
    }
}

fn backend(err: impl std::error::Error + Send + Sync + 'static) -> StoreError {
    StoreError::Backend(Box::new(err))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_id: i64,
    owner: String,
    name: String,
    ssh_url: String,
    http_url: String,
    task: String,
    environment: String,
    git_ref: String,
    sha: String,
    author: Json<Actor>,
    commits: Json<Vec<Commit>>,
    files: Json<Vec<ChangedFile>>,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    logs: Vec<u8>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    /// Rows with a status this build does not know are rejected
    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<JobStatus>().map_err(backend)?;

        Ok(Job {
            id: Some(row.id),
            job_id: row.job_id,
            owner: row.owner,
            name: row.name,
            ssh_url: row.ssh_url,
            http_url: row.http_url,
            task: row.task,
            environment: row.environment,
            git_ref: row.git_ref,
            sha: row.sha,
            author: row.author.0,
            commits: row.commits.0,
            files: row.files.0,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            exit_code: row.exit_code,
            logs: row.logs,
        })
    }
}
