//! Deployment API Handlers
//!
//! HTTP endpoints for starting deploys and inspecting or cancelling them.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use deployer_core::domain::job::Job;
use deployer_core::dto::deploy::DeployRequest;
use deployer_core::dto::job::Page;
use futures::{Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// Response to an accepted deploy request
#[derive(Debug, Serialize)]
pub struct DeployAccepted {
    pub job_id: i64,
}

/// POST /deployments
/// Start a deploy in the background
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<DeployAccepted>)> {
    validate(&req)?;

    tracing::info!(
        "Deploy #{} requested for {}/{} ({})",
        req.job_id,
        req.owner,
        req.name,
        req.git_ref
    );

    let job_id = req.job_id;
    state.coordinator.start_deploy(req);

    Ok((StatusCode::ACCEPTED, Json(DeployAccepted { job_id })))
}

fn validate(req: &DeployRequest) -> ApiResult<()> {
    let required = [
        ("owner", &req.owner),
        ("name", &req.name),
        ("ssh_url", &req.ssh_url),
        ("task", &req.task),
        ("environment", &req.environment),
        ("ref", &req.git_ref),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ApiError::BadRequest(format!("{} cannot be empty", field)));
        }
    }

    if req.job_id <= 0 {
        return Err(ApiError::BadRequest("job_id must be positive".to_string()));
    }

    Ok(())
}

/// GET /deployments?offset=&limit=
/// List deployments, newest first
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing deployments ({:?})", page);

    let jobs = state.coordinator.list_jobs(page).await?;
    Ok(Json(jobs))
}

/// GET /deployment/{id}
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting deployment: {}", id);

    let job = state.coordinator.get_job(id).await?;
    Ok(Json(job))
}

/// GET /deployment/{id}/logs
/// Captured output of a deployment
pub async fn get_deployment_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let logs = state.logs.archived(id).await?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        logs,
    ))
}

/// GET /deployment/{id}/stream
/// Live output of a pending deployment as server-sent events
///
/// Each event's id is the byte offset of its chunk and its data is the
/// chunk as a JSON string.
pub async fn stream_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let events = state.logs.live(id).await?;
    tracing::debug!("Streaming deployment {}", id);

    let stream = events.map(|event| {
        event.map_err(axum::Error::new).and_then(|event| {
            Event::default()
                .id(event.id.to_string())
                .json_data(String::from_utf8_lossy(&event.data))
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /deployment/{id}/cancel
pub async fn cancel_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling deployment: {}", id);

    state.coordinator.cancel_job(id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployer_core::domain::job::Actor;

    fn request() -> DeployRequest {
        DeployRequest {
            job_id: 12,
            owner: "acme".to_string(),
            name: "api".to_string(),
            ssh_url: "git@github.com:acme/api.git".to_string(),
            http_url: "https://github.com/acme/api".to_string(),
            task: "deploy".to_string(),
            environment: "prod".to_string(),
            git_ref: "main".to_string(),
            sha: "abc".to_string(),
            author: Actor::default(),
        }
    }

    #[test]
    fn test_validate_request() {
        assert!(validate(&request()).is_ok());

        let mut missing_ref = request();
        missing_ref.git_ref = " ".to_string();
        assert!(matches!(
            validate(&missing_ref),
            Err(ApiError::BadRequest(msg)) if msg.contains("ref")
        ));

        let mut bad_id = request();
        bad_id.job_id = 0;
        assert!(validate(&bad_id).is_err());
    }
}
