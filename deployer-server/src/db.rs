use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            id UUID PRIMARY KEY,
            job_id BIGINT NOT NULL,
            owner VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            ssh_url TEXT NOT NULL,
            http_url TEXT NOT NULL,
            task VARCHAR(255) NOT NULL,
            environment VARCHAR(255) NOT NULL,
            git_ref VARCHAR(255) NOT NULL,
            sha VARCHAR(64) NOT NULL,
            author JSONB NOT NULL,
            commits JSONB NOT NULL DEFAULT '[]',
            files JSONB NOT NULL DEFAULT '[]',
            status VARCHAR(20) NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ,
            exit_code INTEGER,
            logs BYTEA NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deployments_started_at ON deployments(started_at DESC)",
    )
    .execute(pool)
    .await?;

    // Lookup of the previous successful deploy of a repository
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deployments_repo_status ON deployments(owner, name, status, finished_at DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
