//! SteamCMD handlers.

use crate::api::AppState;
use crate::error::Error;
use crate::types::ToolStatus;
use axum::{Json, extract::State};

/// GET /tool - Whether SteamCMD is available
#[utoipa::path(
    get,
    path = "/tool",
    tag = "tool",
    responses(
        (status = 200, description = "SteamCMD status", body = ToolStatus)
    )
)]
pub async fn get_tool_status(State(state): State<AppState>) -> Json<ToolStatus> {
    Json(state.orchestrator.tool_status())
}

/// POST /tool/install - Install SteamCMD now
#[utoipa::path(
    post,
    path = "/tool/install",
    tag = "tool",
    responses(
        (status = 200, description = "SteamCMD is installed", body = ToolStatus),
        (status = 502, description = "Download or unpacking failed", body = crate::error::ApiError)
    )
)]
pub async fn install_tool(State(state): State<AppState>) -> Result<Json<ToolStatus>, Error> {
    state.orchestrator.install_tool().await.map(Json)
}
