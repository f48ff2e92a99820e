//! Locating, installing and invoking SteamCMD
//!
//! Resolution order: the explicit `steamcmd_path`, the launcher script inside
//! `tool_dir` (where automatic installs land), then `steamcmd` on `PATH`.

mod install;

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::types::{ContentId, Login, ToolStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// Name of the launcher inside an unpacked SteamCMD distribution
#[cfg(windows)]
pub const LAUNCHER_NAME: &str = "steamcmd.exe";
/// Name of the launcher inside an unpacked SteamCMD distribution
#[cfg(not(windows))]
pub const LAUNCHER_NAME: &str = "steamcmd.sh";

const DISTRIBUTION_BASE: &str = "https://steamcdn-a.akamaihd.net/client/installer";

/// Distribution archive for the current platform
pub fn default_distribution_url() -> String {
    let file = if cfg!(windows) {
        "steamcmd.zip"
    } else if cfg!(target_os = "macos") {
        "steamcmd_osx.tar.gz"
    } else {
        "steamcmd_linux.tar.gz"
    };
    format!("{}/{}", DISTRIBUTION_BASE, file)
}

/// SteamCMD installation managed on behalf of all tasks
///
/// Installation is serialized by an internal lock so concurrent tasks that
/// find the tool missing download it once.
#[derive(Debug)]
pub struct SteamCmd {
    config: ToolConfig,
    client: reqwest::Client,
    install_lock: Arc<Mutex<()>>,
}

impl SteamCmd {
    /// Create a handle using the given settings
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            install_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Settings this handle was created with
    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Find an existing SteamCMD executable
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.steamcmd_path {
            if path.is_file() {
                return Some(path.clone());
            }
            tracing::warn!(
                path = %path.display(),
                "Configured SteamCMD path does not exist, falling back to auto-detection"
            );
        }

        let bundled = self.launcher_path();
        if bundled.is_file() {
            return Some(bundled);
        }

        if self.config.search_path {
            return which::which("steamcmd").ok();
        }

        None
    }

    /// Where an automatic install places the launcher
    pub fn launcher_path(&self) -> PathBuf {
        self.config.tool_dir.join(LAUNCHER_NAME)
    }

    /// Whether SteamCMD is available
    pub fn status(&self) -> ToolStatus {
        let path = self.locate();
        ToolStatus {
            installed: path.is_some(),
            path,
            auto_install: self.config.auto_install,
        }
    }

    /// Return the executable, installing it first when missing and allowed.
    ///
    /// `on_progress` receives the download percentage while installing.
    pub async fn ensure_installed<F>(&self, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(f64) + Send + Sync,
    {
        if let Some(path) = self.locate() {
            return Ok(path);
        }
        if !self.config.auto_install {
            return Err(Error::ExternalTool(format!(
                "SteamCMD not found (looked for {}, STEAMCMD_PATH and PATH) and automatic installation is disabled",
                self.launcher_path().display()
            )));
        }
        self.install(on_progress).await
    }

    /// Install SteamCMD into `tool_dir` unless some executable is already
    /// available, and return the executable path.
    pub async fn install<F>(&self, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(f64) + Send + Sync,
    {
        let guard = Arc::clone(&self.install_lock).lock_owned().await;

        // Another task may have finished installing while we waited.
        if let Some(path) = self.locate() {
            return Ok(path);
        }

        let url = self
            .config
            .distribution_url
            .clone()
            .unwrap_or_else(default_distribution_url);

        tracing::info!(
            url = %url,
            tool_dir = %self.config.tool_dir.display(),
            "Installing SteamCMD"
        );

        // The install owns the lock and runs to completion on its own task;
        // a caller that stops waiting only stops receiving progress.
        let (progress_tx, mut progress_rx) = watch::channel(0.0);
        let client = self.client.clone();
        let tool_dir = self.config.tool_dir.clone();
        let job = tokio::spawn(async move {
            let _guard = guard;
            let report = |percent: f64| {
                progress_tx.send_replace(percent);
            };
            let installed =
                install::download_and_install(&client, &url, &tool_dir, LAUNCHER_NAME, &report)
                    .await;
            if let Ok(path) = &installed {
                tracing::info!(path = %path.display(), "SteamCMD installed");
            }
            installed
        });

        on_progress(0.0);
        while progress_rx.changed().await.is_ok() {
            let percent = *progress_rx.borrow_and_update();
            on_progress(percent);
        }
        job.await
            .map_err(|e| Error::Install(format!("install task failed: {}", e)))?
    }
}

/// Command-line arguments for one download.
///
/// Anonymous logins run entirely from the command line. Account logins only
/// set up the install directory here; the login, update and quit commands are
/// written to stdin so the password never appears in the process list.
pub fn launch_args(install_dir: &Path, content_id: ContentId, login: &Login) -> Vec<String> {
    let mut args: Vec<String> = [
        "+@ShutdownOnFailedCommand",
        "1",
        "+@NoPromptForPassword",
        "0",
        "+force_install_dir",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(install_dir.display().to_string());

    if login.is_anonymous() {
        args.extend(
            ["+login", "anonymous", "+app_update"]
                .into_iter()
                .map(String::from),
        );
        args.push(content_id.to_string());
        args.extend(["validate", "+quit"].into_iter().map(String::from));
    }

    args
}

/// Interactive login command
pub fn login_command(username: &str) -> String {
    format!("login {}", username)
}

/// Interactive update command
pub fn update_command(content_id: ContentId) -> String {
    format!("app_update {} validate", content_id)
}

/// Interactive quit command
pub const QUIT_COMMAND: &str = "quit";
