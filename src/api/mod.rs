//! REST API server module
//!
//! A thin JSON adapter over the [`Orchestrator`]: start downloads, poll
//! their snapshots, answer login prompts and fetch the finished files.

use crate::{Config, Orchestrator, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Downloads
/// - `GET /downloads` - List all known tasks
/// - `POST /downloads` - Start a download
/// - `GET /downloads/:id` - Poll a task
/// - `DELETE /downloads/:id` - Cancel a task
/// - `POST /downloads/:id/input` - Answer a Steam Guard prompt
/// - `GET /downloads/:id/artifacts` - Files of a succeeded task
///
/// ## Files
/// - `GET /files/*path` - Any file under the download root
///
/// ## Tool
/// - `GET /tool` - SteamCMD status
/// - `POST /tool/install` - Install SteamCMD
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled,
///   served with its own copy of the spec under `/api-docs/openapi.json`)
/// - `GET /events` - Server-sent events stream
pub fn create_router(orchestrator: Arc<Orchestrator>, config: Arc<Config>) -> Router {
    let files = ServeDir::new(&config.download.download_dir);
    let state = AppState::new(orchestrator, config.clone());

    let router = Router::new()
        // Downloads
        .route(
            "/downloads",
            get(routes::list_downloads).post(routes::start_download),
        )
        .route(
            "/downloads/:id",
            get(routes::get_download).delete(routes::cancel_download),
        )
        .route("/downloads/:id/input", post(routes::submit_input))
        .route("/downloads/:id/artifacts", get(routes::list_artifacts))
        // Tool
        .route("/tool", get(routes::get_tool_status))
        .route("/tool/install", post(routes::install_tool))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        // Files outlive the tasks that produced them
        .nest_service("/files", files);

    let router = if config.api.swagger_ui {
        router.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server fails; see [`start_api_server_with_shutdown`] for a
/// server that stops on a signal.
///
/// # Example
///
/// ```no_run
/// use steamcmd_dl::{Config, Orchestrator};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let orchestrator = Arc::new(Orchestrator::new((*config).clone()).await?);
///
/// steamcmd_dl::api::start_api_server(orchestrator, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(orchestrator: Arc<Orchestrator>, config: Arc<Config>) -> Result<()> {
    start_api_server_with_shutdown(orchestrator, config, std::future::pending()).await
}

/// Start the API server and stop accepting connections once `signal` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn start_api_server_with_shutdown<F>(
    orchestrator: Arc<Orchestrator>,
    config: Arc<Config>,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_address = config.api.bind_address;

    tracing::info!(
        address = %bind_address,
        "Starting API server"
    );

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %bind_address,
        "API server listening"
    );

    serve_with_shutdown(listener, orchestrator, config, signal).await
}

/// Serve the API on an already bound listener until `signal` resolves.
///
/// Pass a signal that resolves after [`Orchestrator::shutdown`] so open
/// `/events` streams end and the server can drain.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    config: Arc<Config>,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(orchestrator, config);

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
