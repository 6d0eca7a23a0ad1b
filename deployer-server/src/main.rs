use anyhow::Context;
use deployer_engine::Coordinator;
use deployer_engine::podman::PodmanProvider;
use deployer_engine::service::{
    LogMultiplexer, LogNotificationSink, LogStatusSink, Notifier, SandboxExecutionService,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;

use crate::config::Config;
use crate::repository::PgJobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "deployer_server=debug,deployer_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Deployer...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let provider = Arc::new(
        PodmanProvider::connect(&config.podman_socket)
            .with_context(|| format!("Podman API socket {} unavailable", config.podman_socket))?,
    );
    provider
        .check_available()
        .await
        .context("Podman is not available")?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(PgJobStore::new(pool));
    let executor = Arc::new(SandboxExecutionService::new(
        provider.clone(),
        config.executor(),
    ));
    let notifier = Arc::new(Notifier::new(
        config.host.clone(),
        LogStatusSink,
        LogNotificationSink,
    ));

    let state = api::AppState {
        coordinator: Coordinator::new(store.clone(), executor, notifier),
        logs: Arc::new(LogMultiplexer::new(store, provider)),
    };

    let app = api::create_router(state);

    tracing::info!(
        "Listening on {} (image {}, links to {})",
        config.bind,
        config.image,
        config.host
    );

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
