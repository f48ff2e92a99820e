//! # steamcmd-dl
//!
//! Download Steam content by driving the SteamCMD command-line tool, report
//! its progress as pollable snapshots and serve the resulting files.
//!
//! ## Pipeline
//!
//! - [`process`] launches SteamCMD and captures its output without blocking
//! - [`progress`] turns that output into monotone progress snapshots
//! - [`orchestrator`] owns task lifecycles: validation, tool installation,
//!   login hand-off, polling and cancellation
//! - [`artifacts`] lists the files a finished task produced
//! - [`api`] exposes all of it over HTTP
//!
//! ## Quick Start
//!
//! ```no_run
//! use steamcmd_dl::{Config, DownloadRequest, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(Config::from_env()?).await?;
//!
//!     let task_id = orchestrator.start(DownloadRequest::anonymous("740")).await?;
//!     loop {
//!         let snapshot = orchestrator.poll(task_id)?;
//!         println!("{:>5.1}% {}", snapshot.progress.percent, snapshot.progress.message);
//!         if snapshot.is_terminal() {
//!             break;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!     }
//!
//!     for artifact in orchestrator.artifacts(task_id)? {
//!         println!("{}", artifact.url);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Locating downloaded files
pub mod artifacts;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Download task orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Child process management
pub mod process;
/// SteamCMD output parsing
pub mod progress;
/// Locating and installing SteamCMD
pub mod tool;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use artifacts::{ArtifactLocator, Artifacts};
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use orchestrator::Orchestrator;
pub use process::{ProcessHandle, ProcessRunner};
pub use progress::{Marker, OutputGrammar, ProgressParser, SteamCmdGrammar};
pub use tool::SteamCmd;
pub use types::{
    ArtifactRef, ContentId, Credentials, DownloadRequest, Event, FailureReason, InputPrompt,
    Login, Phase, ProgressSnapshot, TaskId, TaskSnapshot, TaskState, TaskWarning, ToolStatus,
};

/// Wait for a termination signal, then shut the orchestrator down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use steamcmd_dl::{Config, Orchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(Config::default()).await?;
///     run_with_shutdown(orchestrator).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

/// Resolves once SIGTERM or SIGINT (Ctrl+C elsewhere) is received
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Resolves once Ctrl+C is received
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
