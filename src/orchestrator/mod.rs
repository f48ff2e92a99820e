//! Download orchestration split into focused submodules.
//!
//! The `Orchestrator` struct and its methods are organized by concern:
//! - [`control`] - Starting, polling, cancelling and answering prompts
//! - [`task`] - The per-task driver (worker slot, install, spawn, poll loop)
//! - [`lifecycle`] - Retention of finished tasks and shutdown

mod control;
mod lifecycle;
mod task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::artifacts::ArtifactLocator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::ProcessRunner;
use crate::progress::{OutputGrammar, SteamCmdGrammar};
use crate::tool::SteamCmd;
use crate::types::{ContentId, Event, TaskId, TaskSnapshot};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slower subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Bookkeeping for one task, live or finished
pub(crate) struct TaskEntry {
    /// Install directory relative to the download root
    pub(crate) install_dir: PathBuf,
    /// Latest published snapshot; the driver holds the sender
    pub(crate) snapshot: watch::Receiver<TaskSnapshot>,
    pub(crate) cancel: CancellationToken,
    /// Answers to input prompts, consumed by the driver
    pub(crate) input_tx: mpsc::UnboundedSender<String>,
    /// When a caller first saw the terminal snapshot
    pub(crate) observed_terminal_at: Option<Instant>,
}

impl TaskEntry {
    pub(crate) fn current(&self) -> TaskSnapshot {
        self.snapshot
            .borrow()
            .clone()
            .with_elapsed(chrono::Utc::now())
    }
}

/// All tasks plus the indexes that enforce one active task per content id
/// and per install directory
#[derive(Default)]
pub(crate) struct TaskTable {
    pub(crate) tasks: HashMap<TaskId, TaskEntry>,
    pub(crate) active_by_content: HashMap<ContentId, TaskId>,
    pub(crate) active_by_dir: HashMap<PathBuf, TaskId>,
}

impl TaskTable {
    /// Active task whose install directory equals, contains or lies inside
    /// `dir` (both relative to the download root and normalized)
    pub(crate) fn active_overlapping(&self, dir: &Path) -> Option<TaskId> {
        self.active_by_dir
            .iter()
            .find(|(active, _)| dir.starts_with(active) || active.starts_with(dir))
            .map(|(_, task_id)| *task_id)
    }
}

/// Runs SteamCMD downloads (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// SteamCMD location and one-time install
    pub(crate) tool: Arc<SteamCmd>,
    pub(crate) runner: ProcessRunner,
    pub(crate) locator: ArtifactLocator,
    /// Output vocabulary handed to every task's parser
    pub(crate) grammar: Arc<dyn OutputGrammar>,
    pub(crate) table: Arc<Mutex<TaskTable>>,
    /// Limits concurrently running SteamCMD processes
    pub(crate) workers: Arc<Semaphore>,
    pub(crate) next_id: Arc<AtomicU64>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Cancelled once shutdown has completed; ends long-lived event streams
    pub(crate) stopped: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("download_dir", &self.config.download.download_dir)
            .field("max_concurrent_tasks", &self.config.tasks.max_concurrent_tasks)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// Validates the configuration and creates the download root. SteamCMD
    /// itself is located (or installed) lazily by the first task.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let locator = ArtifactLocator::new(
            config.download.download_dir.clone(),
            config.api.base_url(),
        );
        let tool = SteamCmd::new(config.tool.clone());

        let status = tool.status();
        tracing::info!(
            download_dir = %config.download.download_dir.display(),
            steamcmd = ?status.path,
            auto_install = status.auto_install,
            max_concurrent_tasks = config.tasks.max_concurrent_tasks,
            "Orchestrator initialized"
        );

        Ok(Self {
            runner: ProcessRunner::new(config.tasks.output_tail_lines),
            workers: Arc::new(Semaphore::new(config.tasks.max_concurrent_tasks)),
            config: Arc::new(config),
            tool: Arc::new(tool),
            locator,
            grammar: Arc::new(SteamCmdGrammar::new()),
            table: Arc::new(Mutex::new(TaskTable::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            event_tx,
            stopped: CancellationToken::new(),
        })
    }

    /// Use a different output grammar for tasks started from now on
    pub fn with_grammar(mut self, grammar: Arc<dyn OutputGrammar>) -> Self {
        self.grammar = grammar;
        self
    }

    /// Subscribe to task events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls more than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration this orchestrator runs with
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Locator for the files under the download root
    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // no receivers is fine
        self.event_tx.send(event).ok();
    }

    /// Lock the task table; a panic while holding the lock leaves the
    /// table consistent, so poisoning is ignored
    pub(crate) fn lock_table(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
