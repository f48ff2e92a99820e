//! Configuration types for steamcmd-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Environment variable overriding the download root
pub const ENV_DOWNLOAD_DIR: &str = "STEAMCMD_DL_DOWNLOAD_DIR";
/// Environment variable pointing at an existing SteamCMD executable
pub const ENV_STEAMCMD_PATH: &str = "STEAMCMD_PATH";
/// Environment variable with the port the HTTP server listens on
pub const ENV_PORT: &str = "PORT";
/// Environment variable with the public base URL used for file links
pub const ENV_PUBLIC_URL: &str = "PUBLIC_URL";
/// Public domain assigned by Railway, used when `PUBLIC_URL` is unset
pub const ENV_RAILWAY_PUBLIC_DOMAIN: &str = "RAILWAY_PUBLIC_DOMAIN";

/// Where downloaded content is stored
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Download root; each task installs into its own subdirectory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    #[schema(value_type = String)]
    pub download_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

/// Locating and installing SteamCMD
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolConfig {
    /// Explicit path to the SteamCMD executable (auto-detected if None)
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub steamcmd_path: Option<PathBuf>,

    /// Directory SteamCMD is installed into when missing (default: "./steamcmd")
    #[serde(default = "default_tool_dir")]
    #[schema(value_type = String)]
    pub tool_dir: PathBuf,

    /// Whether to search PATH when no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Install SteamCMD automatically before the first download (default: true)
    #[serde(default = "default_true")]
    pub auto_install: bool,

    /// Override for the SteamCMD distribution archive URL (platform default if None)
    #[serde(default)]
    pub distribution_url: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            steamcmd_path: None,
            tool_dir: default_tool_dir(),
            search_path: true,
            auto_install: true,
            distribution_url: None,
        }
    }
}

/// Task scheduling and process supervision
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskConfig {
    /// Maximum number of SteamCMD processes running at once (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// Interval between output polls, in milliseconds (default: 250)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    #[schema(value_type = u64)]
    pub poll_interval: Duration,

    /// Grace period after SIGTERM before the process is killed, in seconds (default: 5)
    #[serde(default = "default_terminate_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub terminate_timeout: Duration,

    /// Number of output lines kept for diagnostics (default: 20)
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,

    /// How long a finished task stays pollable after its final state was observed,
    /// in seconds (default: 600)
    #[serde(default = "default_task_retention", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub task_retention: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            poll_interval: default_poll_interval(),
            terminate_timeout: default_terminate_timeout(),
            output_tail_lines: default_output_tail_lines(),
            task_retention: default_task_retention(),
        }
    }
}

/// HTTP API and file server configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:7860)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Public base URL used when building file links (default: derived from bind address)
    #[serde(default)]
    pub public_url: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_url: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

impl ApiConfig {
    /// Base URL that file links are rooted at, without a trailing slash
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.bind_address.ip().is_unspecified() {
                    "localhost".to_string()
                } else {
                    self.bind_address.ip().to_string()
                };
                format!("http://{}:{}", host, self.bind_address.port())
            }
        }
    }
}

/// Main configuration
///
/// Sub-configs are flattened, so the serialized form has no nesting except
/// for `api`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Storage settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// SteamCMD location and installation
    #[serde(flatten)]
    pub tool: ToolConfig,

    /// Scheduling and supervision
    #[serde(flatten)]
    pub tasks: TaskConfig,

    /// HTTP API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Default configuration with overrides from the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dir) = read(ENV_DOWNLOAD_DIR) {
            self.download.download_dir = PathBuf::from(dir);
        }

        if let Some(path) = read(ENV_STEAMCMD_PATH) {
            self.tool.steamcmd_path = Some(PathBuf::from(path));
        }

        if let Some(port) = read(ENV_PORT) {
            let port: u16 = port.trim().parse().map_err(|_| Error::Config {
                message: format!("'{}' is not a valid port", port),
                key: Some(ENV_PORT.to_string()),
            })?;
            self.api.bind_address.set_port(port);
        }

        if let Some(url) = read(ENV_PUBLIC_URL) {
            self.api.public_url = Some(url);
        } else if let Some(domain) = read(ENV_RAILWAY_PUBLIC_DOMAIN) {
            let url = if domain.starts_with("http://") || domain.starts_with("https://") {
                domain
            } else {
                format!("https://{}", domain)
            };
            self.api.public_url = Some(url);
        }

        self.validate()
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tasks.max_concurrent_tasks == 0 {
            return Err(Error::Config {
                message: "max_concurrent_tasks must be at least 1".to_string(),
                key: Some("max_concurrent_tasks".to_string()),
            });
        }
        if self.tasks.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "poll_interval must be greater than zero".to_string(),
                key: Some("poll_interval".to_string()),
            });
        }
        if self.tasks.terminate_timeout.is_zero() {
            return Err(Error::Config {
                message: "terminate_timeout must be greater than zero".to_string(),
                key: Some("terminate_timeout".to_string()),
            });
        }
        if let Some(url) = &self.api.public_url
            && url::Url::parse(url).is_err()
        {
            return Err(Error::Config {
                message: format!("'{}' is not a valid URL", url),
                key: Some("public_url".to_string()),
            });
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_tool_dir() -> PathBuf {
    PathBuf::from("./steamcmd")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_terminate_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_output_tail_lines() -> usize {
    20
}

fn default_task_retention() -> Duration {
    Duration::from_secs(600)
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7860))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
