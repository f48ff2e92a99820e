//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`downloads`] - Starting, polling and cancelling download tasks
//! - [`tool`] - SteamCMD availability and installation
//! - [`system`] - Health, events, OpenAPI

use crate::error::ApiError;
use crate::types::{Credentials, DownloadRequest, TaskId};
use serde::{Deserialize, Serialize};

mod downloads;
mod system;
mod tool;

pub use downloads::*;
pub use system::*;
pub use tool::*;

// ============================================================================
// Request/Response Types (shared across handlers)
// ============================================================================

/// Request body for POST /downloads
#[derive(Deserialize, Serialize, utoipa::ToSchema)]
pub struct StartDownloadRequest {
    /// Numeric app id or a Steam store URL
    pub identifier: String,
    /// Log in anonymously (default: true unless a username is given)
    #[serde(default)]
    pub anonymous: Option<bool>,
    /// Steam account name
    #[serde(default)]
    pub username: Option<String>,
    /// Steam account password
    #[serde(default)]
    pub password: Option<String>,
    /// Install directory relative to the download root
    #[serde(default)]
    pub install_dir: Option<String>,
}

impl std::fmt::Debug for StartDownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartDownloadRequest")
            .field("identifier", &self.identifier)
            .field("anonymous", &self.anonymous)
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("install_dir", &self.install_dir)
            .finish()
    }
}

impl StartDownloadRequest {
    /// Convert the wire form into a [`DownloadRequest`].
    ///
    /// Anonymous mode and an account are mutually exclusive; a username
    /// without `anonymous: false` selects account login.
    pub fn into_download_request(self) -> Result<DownloadRequest, ApiError> {
        let username = self.username.filter(|u| !u.trim().is_empty());
        let anonymous = self.anonymous.unwrap_or(username.is_none());

        let request = match (anonymous, username) {
            (true, Some(_)) => {
                return Err(ApiError::validation(
                    "anonymous login cannot be combined with a username",
                ));
            }
            (true, None) => DownloadRequest::anonymous(self.identifier),
            (false, None) => {
                return Err(ApiError::validation(
                    "username is required when anonymous is false",
                ));
            }
            (false, Some(username)) => DownloadRequest::with_account(
                self.identifier,
                Credentials::new(username, self.password.unwrap_or_default()),
            ),
        };

        Ok(match self.install_dir {
            Some(dir) if !dir.is_empty() => request.install_dir(dir),
            _ => request,
        })
    }
}

/// Response for POST /downloads
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct StartDownloadResponse {
    /// Id to poll the new task with
    pub task_id: TaskId,
}

/// Request body for POST /downloads/:id/input
#[derive(Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitInputRequest {
    /// The Steam Guard / two-factor code
    pub input: String,
}

impl std::fmt::Debug for SubmitInputRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitInputRequest")
            .field("input", &"<redacted>")
            .finish()
    }
}
