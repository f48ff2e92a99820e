//! Download task handlers.

use super::{StartDownloadRequest, StartDownloadResponse, SubmitInputRequest};
use crate::api::AppState;
use crate::error::Error;
use crate::types::{ArtifactRef, TaskId, TaskSnapshot};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /downloads - List all known tasks
#[utoipa::path(
    get,
    path = "/downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "Snapshots of all known tasks, oldest first", body = Vec<TaskSnapshot>)
    )
)]
pub async fn list_downloads(State(state): State<AppState>) -> Json<Vec<TaskSnapshot>> {
    Json(state.orchestrator.list())
}

/// POST /downloads - Start a download
#[utoipa::path(
    post,
    path = "/downloads",
    tag = "downloads",
    request_body = StartDownloadRequest,
    responses(
        (status = 201, description = "Task accepted", body = StartDownloadResponse),
        (status = 400, description = "Invalid identifier, login or install directory", body = crate::error::ApiError),
        (status = 409, description = "The content already has an active task", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn start_download(
    State(state): State<AppState>,
    Json(body): Json<StartDownloadRequest>,
) -> Response {
    let request = match body.into_download_request() {
        Ok(request) => request,
        Err(api_error) => return api_error.into_response(),
    };

    match state.orchestrator.start(request).await {
        Ok(task_id) => {
            (StatusCode::CREATED, Json(StartDownloadResponse { task_id })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /downloads/:id - Poll a task
#[utoipa::path(
    get,
    path = "/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = u64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Current snapshot", body = TaskSnapshot),
        (status = 404, description = "Unknown task", body = crate::error::ApiError)
    )
)]
pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TaskSnapshot>, Error> {
    state.orchestrator.poll(TaskId(id)).map(Json)
}

/// DELETE /downloads/:id - Cancel a task
#[utoipa::path(
    delete,
    path = "/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = u64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Terminal snapshot after cancellation", body = TaskSnapshot),
        (status = 404, description = "Unknown task", body = crate::error::ApiError)
    )
)]
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TaskSnapshot>, Error> {
    state.orchestrator.cancel(TaskId(id)).await.map(Json)
}

/// POST /downloads/:id/input - Answer a pending prompt
#[utoipa::path(
    post,
    path = "/downloads/{id}/input",
    tag = "downloads",
    params(
        ("id" = u64, Path, description = "Task ID")
    ),
    request_body = SubmitInputRequest,
    responses(
        (status = 204, description = "Input handed to SteamCMD"),
        (status = 400, description = "Empty or multi-line input", body = crate::error::ApiError),
        (status = 404, description = "Unknown task", body = crate::error::ApiError),
        (status = 409, description = "The task is not waiting for input", body = crate::error::ApiError)
    )
)]
pub async fn submit_input(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<SubmitInputRequest>,
) -> Result<StatusCode, Error> {
    state.orchestrator.submit_input(TaskId(id), body.input)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /downloads/:id/artifacts - Files produced by a succeeded task
#[utoipa::path(
    get,
    path = "/downloads/{id}/artifacts",
    tag = "downloads",
    params(
        ("id" = u64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Downloadable files", body = Vec<ArtifactRef>),
        (status = 404, description = "Unknown task", body = crate::error::ApiError),
        (status = 409, description = "The task has not succeeded", body = crate::error::ApiError)
    )
)]
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<ArtifactRef>>, Error> {
    let orchestrator = state.orchestrator.clone();
    let task_id = TaskId(id);
    // walking a large install tree touches the filesystem
    tokio::task::spawn_blocking(move || orchestrator.artifacts(task_id))
        .await
        .map_err(|e| Error::ApiServerError(format!("artifact listing panicked: {e}")))?
        .map(Json)
}
