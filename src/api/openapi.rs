//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the steamcmd-dl REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the steamcmd-dl REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "steamcmd-dl REST API",
        version = "0.1.0",
        description = "Start SteamCMD downloads, poll their progress and fetch the resulting files",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:7860", description = "Local development server")
    ),
    paths(
        // Downloads
        crate::api::routes::list_downloads,
        crate::api::routes::start_download,
        crate::api::routes::get_download,
        crate::api::routes::cancel_download,
        crate::api::routes::submit_input,
        crate::api::routes::list_artifacts,

        // Tool
        crate::api::routes::get_tool_status,
        crate::api::routes::install_tool,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::ContentId,
        crate::types::Phase,
        crate::types::TaskState,
        crate::types::InputPrompt,
        crate::types::ByteProgress,
        crate::types::ProgressSnapshot,
        crate::types::FailureReason,
        crate::types::TaskWarning,
        crate::types::TaskSnapshot,
        crate::types::ArtifactRef,
        crate::types::ToolStatus,
        crate::types::Event,

        // API request/response types
        crate::api::routes::StartDownloadRequest,
        crate::api::routes::StartDownloadResponse,
        crate::api::routes::SubmitInputRequest,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "downloads", description = "Download tasks - Start, poll, cancel and answer login prompts"),
        (name = "tool", description = "SteamCMD - Availability and one-time installation"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
