//! Core types for steamcmd-dl

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use utoipa::ToSchema;

/// Unique identifier for a download task
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Hosts whose `/app/<id>` URLs name a Steam app
const APP_URL_HOSTS: &[&str] = &["store.steampowered.com", "steamcommunity.com", "steamdb.info"];

/// Numeric Steam content (app) identifier, never zero
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct ContentId(u32);

impl ContentId {
    /// Wrap a raw app id; `None` for zero
    pub fn new(id: u32) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    /// Get the inner value
    pub fn get(&self) -> u32 {
        self.0
    }

    /// Resolve user input to a content id.
    ///
    /// Accepts a bare numeric id (`"480"`) or a store page URL such as
    /// `https://store.steampowered.com/app/480/Spacewar/`.
    pub fn parse_identifier(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidRequest(
                "game ID or URL is required".to_string(),
            ));
        }

        let digits = if input.starts_with("http://") || input.starts_with("https://") {
            app_id_from_url(input).ok_or_else(|| {
                Error::InvalidRequest(format!("no Steam app id found in URL '{}'", input))
            })?
        } else {
            input.to_string()
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidRequest(format!(
                "'{}' is not a numeric game ID",
                input
            )));
        }

        digits
            .parse::<u32>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| Error::InvalidRequest(format!("'{}' is not a valid game ID", input)))
    }
}

fn app_id_from_url(input: &str) -> Option<String> {
    let url = url::Url::parse(input).ok()?;
    let host = url.host_str()?;
    if !APP_URL_HOSTS
        .iter()
        .any(|known| host == *known || host.ends_with(&format!(".{}", known)))
    {
        return None;
    }

    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "app")?;
    segments.next().map(str::to_string)
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bytes that are overwritten with zeros when dropped
struct Secret(Vec<u8>);

impl Secret {
    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Steam account credentials
///
/// Never serialized and never printed; both fields are zeroed in memory when
/// the value is dropped.
#[derive(Debug)]
pub struct Credentials {
    username: Secret,
    password: Secret,
}

impl Credentials {
    /// Create credentials from a username and password
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Secret(username.into().into_bytes()),
            password: Secret(password.into().into_bytes()),
        }
    }

    /// Account name
    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    pub(crate) fn password(&self) -> &str {
        self.password.as_str()
    }
}

/// How the tool logs in to Steam
#[derive(Debug)]
pub enum Login {
    /// Anonymous login (free content and dedicated servers)
    Anonymous,
    /// Account login; credentials are handed to the tool over stdin
    Account(Credentials),
}

impl Login {
    /// Whether this is an anonymous login
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Login::Anonymous)
    }
}

/// A request to download one piece of content
#[derive(Debug)]
pub struct DownloadRequest {
    /// Numeric id or store URL
    pub identifier: String,
    /// Login mode
    pub login: Login,
    /// Install directory relative to the download root (default: the content id)
    pub install_dir: Option<PathBuf>,
}

impl DownloadRequest {
    /// Anonymous request for `identifier`
    pub fn anonymous(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            login: Login::Anonymous,
            install_dir: None,
        }
    }

    /// Account request for `identifier`
    pub fn with_account(identifier: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            identifier: identifier.into(),
            login: Login::Account(credentials),
            install_dir: None,
        }
    }

    /// Override the install directory (relative to the download root)
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    /// Resolve the identifier to a content id
    pub fn content_id(&self) -> Result<ContentId> {
        ContentId::parse_identifier(&self.identifier)
    }

    /// Validate the request and return the resolved content id together with
    /// the install directory relative to the download root.
    pub fn resolve(&self) -> Result<(ContentId, PathBuf)> {
        let content_id = self.content_id()?;

        if let Login::Account(credentials) = &self.login
            && (credentials.username().trim().is_empty() || credentials.password().is_empty())
        {
            return Err(Error::InvalidRequest(
                "username and password are required for non-anonymous login".to_string(),
            ));
        }

        let relative = match &self.install_dir {
            Some(dir) => normalize_relative_dir(dir)?,
            None => PathBuf::from(content_id.to_string()),
        };

        Ok((content_id, relative))
    }
}

/// Rebuild `dir` from its normal components so `./480` and `480` name the
/// same directory. Anything that could leave the download root, or that
/// names the root itself, is rejected.
fn normalize_relative_dir(dir: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in dir.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "install directory '{}' must be a relative path inside the download root",
                    dir.display()
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidRequest(
            "install directory must name a directory below the download root".to_string(),
        ));
    }
    Ok(normalized)
}

/// Coarse stage of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for a worker slot
    Queued,
    /// Fetching and unpacking SteamCMD
    Installing,
    /// Tool launched, updating itself
    Starting,
    /// Logging in to Steam
    LoggingIn,
    /// Tool is waiting for input (Steam Guard / two-factor code)
    AwaitingInput,
    /// Content download in progress
    Downloading,
    /// Tool is validating installed files
    Verifying,
    /// Task reached a terminal state
    Finished,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Queued => "queued",
            Phase::Installing => "installing",
            Phase::Starting => "starting",
            Phase::LoggingIn => "logging_in",
            Phase::AwaitingInput => "awaiting_input",
            Phase::Downloading => "downloading",
            Phase::Verifying => "verifying",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet terminal
    Running,
    /// Tool reported success
    Succeeded,
    /// Tool failed, crashed, or could not be started
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl TaskState {
    /// Whether no further transition can occur
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Kind of input the tool is prompting for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputPrompt {
    /// Account password
    Password,
    /// Steam Guard e-mail code or mobile two-factor code
    GuardCode,
}

/// Byte counters reported by the tool alongside the percentage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ByteProgress {
    /// Bytes processed so far
    pub done: u64,
    /// Total bytes of the current stage
    pub total: u64,
}

/// Immutable point-in-time view of a task's progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressSnapshot {
    /// Percent complete (0-100), never decreases within a task
    pub percent: f64,
    /// Current phase
    pub phase: Phase,
    /// Lifecycle state
    pub state: TaskState,
    /// Latest human-readable status line
    pub message: String,
    /// Pending input prompt, if the tool is waiting for one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<InputPrompt>,
    /// Byte counters of the current stage, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<ByteProgress>,
}

impl ProgressSnapshot {
    /// Snapshot of a task that has not started yet
    pub fn queued() -> Self {
        Self {
            percent: 0.0,
            phase: Phase::Queued,
            state: TaskState::Running,
            message: "Waiting for a free worker".to_string(),
            prompt: None,
            bytes: None,
        }
    }

    /// Whether the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the task succeeded
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

/// Why a task failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// SteamCMD could not be launched
    SpawnFailed,
    /// SteamCMD could not be installed
    InstallFailed,
    /// SteamCMD printed a recognized failure message
    ToolReported,
    /// SteamCMD exited with a non-zero code and no success message
    ExitCode {
        /// The exit code
        code: i32,
    },
    /// SteamCMD was killed by a signal
    Terminated,
}

/// Non-fatal conditions attached to a terminal snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskWarning {
    /// The tool reported success but no files were found
    NoArtifacts,
}

/// Snapshot of a task as returned by polling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskSnapshot {
    /// Task id
    pub task_id: TaskId,
    /// Content being downloaded
    pub content_id: ContentId,
    /// Progress fields
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
    /// Failure classification for failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Warning for succeeded tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<TaskWarning>,
    /// Last captured output lines, for troubleshooting
    #[serde(default)]
    pub output_tail: Vec<String>,
    /// Number of files found once the task succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_count: Option<usize>,
    /// When the task was created
    pub started_at: DateTime<Utc>,
    /// When this snapshot was produced
    pub updated_at: DateTime<Utc>,
    /// When the task became terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Seconds since the task was created (until it finished)
    pub elapsed_secs: f64,
}

impl TaskSnapshot {
    /// Build a snapshot stamped with the current time
    pub fn new(
        task_id: TaskId,
        content_id: ContentId,
        progress: ProgressSnapshot,
        started_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            content_id,
            progress,
            failure: None,
            warning: None,
            output_tail: Vec::new(),
            artifact_count: None,
            started_at,
            updated_at: now,
            finished_at: None,
            elapsed_secs: 0.0,
        }
        .with_elapsed(now)
    }

    /// Recompute `elapsed_secs` relative to `now`
    pub fn with_elapsed(mut self, now: DateTime<Utc>) -> Self {
        let end = self.finished_at.unwrap_or(now);
        self.elapsed_secs = (end - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self
    }

    /// Whether the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.progress.is_terminal()
    }
}

/// A downloaded file made available for retrieval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ArtifactRef {
    /// Absolute (or root-joined) path on disk
    #[schema(value_type = String)]
    pub path: PathBuf,
    /// Path relative to the download root, `/`-separated
    pub relative_path: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// URL under which the file is served
    pub url: String,
}

/// Whether SteamCMD is available
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ToolStatus {
    /// SteamCMD was found
    pub installed: bool,
    /// Resolved executable path
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
    /// Missing tools are installed automatically before the first download
    pub auto_install: bool,
}

/// Events broadcast by the orchestrator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted
    Queued {
        /// Task id
        task_id: TaskId,
        /// Content id
        content_id: ContentId,
    },
    /// Task moved to another phase
    PhaseChanged {
        /// Task id
        task_id: TaskId,
        /// New phase
        phase: Phase,
    },
    /// Percent advanced
    Progress {
        /// Task id
        task_id: TaskId,
        /// Percent complete
        percent: f64,
    },
    /// The tool is waiting for input
    InputRequired {
        /// Task id
        task_id: TaskId,
        /// What the tool asked for
        prompt: InputPrompt,
    },
    /// Task succeeded
    Succeeded {
        /// Task id
        task_id: TaskId,
        /// Number of files found
        artifact_count: usize,
    },
    /// Task failed
    Failed {
        /// Task id
        task_id: TaskId,
        /// Failure message
        message: String,
    },
    /// Task cancelled
    Cancelled {
        /// Task id
        task_id: TaskId,
    },
    /// SteamCMD was installed
    ToolInstalled {
        /// Installed executable
        #[schema(value_type = String)]
        path: PathBuf,
    },
    /// Orchestrator is shutting down
    Shutdown,
}
