//! Error types for steamcmd-dl
//!
//! This module provides the error taxonomy for the library:
//! - Request validation and task lookup errors returned by the orchestrator
//! - Process spawn and external tool failures
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::{ContentId, TaskId, TaskSnapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for steamcmd-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for steamcmd-dl
///
/// Failures that happen inside a running task never surface through this type;
/// they end the task with a failed [`TaskSnapshot`]. These variants are what
/// callers of the orchestrator and the API see directly.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "PORT")
        key: Option<String>,
    },

    /// The external tool could not be launched
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        /// Program that was being launched
        program: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The request was rejected before any process was started
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A task for the same content is still active
    #[error("content {content_id} already has an active task {task_id}")]
    AlreadyRunning {
        /// Content identifier of the rejected request
        content_id: ContentId,
        /// The task that is already running
        task_id: TaskId,
        /// Latest snapshot of the running task
        snapshot: Box<TaskSnapshot>,
    },

    /// Task id is not (or no longer) known
    #[error("no such task: {0}")]
    UnknownTask(TaskId),

    /// Operation not allowed in the task's current state
    #[error("cannot {operation} task {task_id} while it is {state}")]
    InvalidState {
        /// The task the operation targeted
        task_id: TaskId,
        /// The operation that was attempted (e.g., "submit input")
        operation: String,
        /// Human-readable current state
        state: String,
    },

    /// External tool reported a failure or exited abnormally
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Installing the external tool failed
    #[error("tool installation failed: {0}")]
    Install(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "unknown_task",
///     "message": "no such task: 7",
///     "details": {
///       "task_id": 7
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "invalid_request", "already_running")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidRequest(_) => 400,

            // 404 Not Found
            Error::UnknownTask(_) => 404,

            // 409 Conflict
            Error::AlreadyRunning { .. } => 409,
            Error::InvalidState { .. } => 409,

            // 500 Internal Server Error - Server-side issues
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,

            // 502 Bad Gateway - External tool errors
            Error::ExternalTool(_) => 502,
            Error::Install(_) => 502,

            // 503 Service Unavailable
            Error::Spawn { .. } => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Spawn { .. } => "spawn_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::AlreadyRunning { .. } => "already_running",
            Error::UnknownTask(_) => "unknown_task",
            Error::InvalidState { .. } => "invalid_state",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Install(_) => "install_error",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::ApiServerError(_) => "api_server_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Spawn { program, .. } => Some(serde_json::json!({
                "program": program,
                "hint": "install SteamCMD or enable automatic installation",
            })),
            Error::AlreadyRunning {
                content_id,
                task_id,
                snapshot,
            } => Some(serde_json::json!({
                "content_id": content_id,
                "task_id": task_id,
                "snapshot": snapshot,
            })),
            Error::UnknownTask(task_id) => Some(serde_json::json!({ "task_id": task_id })),
            Error::InvalidState {
                task_id,
                operation,
                state,
            } => Some(serde_json::json!({
                "task_id": task_id,
                "operation": operation,
                "state": state,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProgressSnapshot, TaskSnapshot};

    fn all_error_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "not a port".into(),
                    key: Some("PORT".into()),
                },
                400,
                "config_error",
            ),
            (
                Error::Spawn {
                    program: PathBuf::from("/opt/steamcmd/steamcmd.sh"),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                },
                503,
                "spawn_error",
            ),
            (
                Error::InvalidRequest("bad id".into()),
                400,
                "invalid_request",
            ),
            (Error::UnknownTask(TaskId(9)), 404, "unknown_task"),
            (
                Error::InvalidState {
                    task_id: TaskId(1),
                    operation: "submit input".into(),
                    state: "downloading".into(),
                },
                409,
                "invalid_state",
            ),
            (
                Error::ExternalTool("exit 8".into()),
                502,
                "external_tool_error",
            ),
            (Error::Install("404".into()), 502, "install_error"),
            (Error::ShuttingDown, 503, "shutting_down"),
            (
                Error::Io(std::io::Error::other("disk")),
                500,
                "io_error",
            ),
            (
                Error::ApiServerError("bind".into()),
                500,
                "api_server_error",
            ),
        ]
    }

    #[test]
    fn every_variant_maps_to_status_and_code() {
        for (error, status, code) in all_error_variants() {
            assert_eq!(error.status_code(), status, "status for {error:?}");
            assert_eq!(error.error_code(), code, "code for {error:?}");
        }
    }

    #[test]
    fn already_running_carries_existing_snapshot_in_details() {
        let snapshot = TaskSnapshot::new(
            TaskId(3),
            ContentId::new(480).unwrap(),
            ProgressSnapshot::queued(),
            chrono::Utc::now(),
        );
        let error = Error::AlreadyRunning {
            content_id: ContentId::new(480).unwrap(),
            task_id: TaskId(3),
            snapshot: Box::new(snapshot),
        };
        assert_eq!(error.status_code(), 409);

        let api_error: ApiError = error.into();
        assert_eq!(api_error.error.code, "already_running");
        let details = api_error.error.details.unwrap();
        assert_eq!(details["task_id"], 3);
        assert_eq!(details["content_id"], 480);
        assert_eq!(details["snapshot"]["phase"], "queued");
    }

    #[test]
    fn spawn_error_details_include_remediation_hint() {
        let api_error: ApiError = Error::Spawn {
            program: PathBuf::from("steamcmd"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        let details = api_error.error.details.unwrap();
        assert!(details["hint"].as_str().unwrap().contains("install SteamCMD"));
    }

    #[test]
    fn unknown_task_message_names_the_task() {
        let api_error: ApiError = Error::UnknownTask(TaskId(42)).into();
        assert!(api_error.error.message.contains("42"));
        assert_eq!(api_error.error.details.unwrap()["task_id"], 42);
    }
}
