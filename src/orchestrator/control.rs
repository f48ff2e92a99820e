//! Task control: start, poll, cancel, input, artifacts and the tool itself.

use crate::error::{Error, Result};
use crate::types::{
    ArtifactRef, DownloadRequest, Event, InputPrompt, ProgressSnapshot, TaskId, TaskSnapshot,
    TaskState, ToolStatus,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::task::TaskContext;
use super::{Orchestrator, TaskEntry};

impl Orchestrator {
    /// Start downloading the requested content
    ///
    /// The request is validated up front; nothing is spawned for an invalid
    /// identifier. At most one task per content id is active at a time, and
    /// no two active tasks share an install directory or nest one inside
    /// the other. Tasks beyond `max_concurrent_tasks`
    /// wait in the `queued` phase.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if the request cannot be resolved
    /// - [`Error::AlreadyRunning`] if the content is already being downloaded
    ///   or the install directory overlaps an active task's
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn start(&self, request: DownloadRequest) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let (content_id, install_dir) = request.resolve()?;
        let absolute_dir =
            std::path::absolute(self.config.download.download_dir.join(&install_dir))?;
        let DownloadRequest { login, .. } = request;

        let started_at = Utc::now();
        let cancel = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let (task_id, publisher) = {
            let mut table = self.lock_table();
            self.prune_finished(&mut table);

            let existing = table
                .active_by_content
                .get(&content_id)
                .copied()
                .or_else(|| table.active_overlapping(&install_dir));
            if let Some(existing) = existing {
                let snapshot = table
                    .tasks
                    .get(&existing)
                    .map(TaskEntry::current)
                    .ok_or(Error::UnknownTask(existing))?;
                return Err(Error::AlreadyRunning {
                    content_id,
                    task_id: existing,
                    snapshot: Box::new(snapshot),
                });
            }

            let task_id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let initial = TaskSnapshot::new(
                task_id,
                content_id,
                ProgressSnapshot::queued(),
                started_at,
            );
            let (publisher, snapshot) = watch::channel(initial);

            table.tasks.insert(
                task_id,
                TaskEntry {
                    install_dir: install_dir.clone(),
                    snapshot,
                    cancel: cancel.clone(),
                    input_tx,
                    observed_terminal_at: None,
                },
            );
            table.active_by_content.insert(content_id, task_id);
            table.active_by_dir.insert(install_dir.clone(), task_id);
            (task_id, publisher)
        };

        tracing::info!(
            task_id = task_id.0,
            content_id = content_id.get(),
            install_dir = %absolute_dir.display(),
            anonymous = login.is_anonymous(),
            "Download queued"
        );
        self.emit_event(Event::Queued {
            task_id,
            content_id,
        });

        let context = TaskContext {
            task_id,
            content_id,
            install_dir,
            absolute_dir,
            login,
            cancel,
            input_rx,
            publisher,
            started_at,
        };
        tokio::spawn(self.clone().run_task(context));

        Ok(task_id)
    }

    /// Current snapshot of a task; never blocks on the task itself
    ///
    /// The first time a terminal snapshot is returned starts the task's
    /// retention period.
    pub fn poll(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        let mut table = self.lock_table();
        let entry = table
            .tasks
            .get_mut(&task_id)
            .ok_or(Error::UnknownTask(task_id))?;
        let snapshot = entry.current();
        if snapshot.is_terminal() && entry.observed_terminal_at.is_none() {
            entry.observed_terminal_at = Some(std::time::Instant::now());
        }
        Ok(snapshot)
    }

    /// Snapshots of all known tasks, oldest first
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut table = self.lock_table();
        self.prune_finished(&mut table);
        let mut snapshots: Vec<TaskSnapshot> =
            table.tasks.values().map(TaskEntry::current).collect();
        snapshots.sort_by_key(|s| s.task_id);
        snapshots
    }

    /// Cancel a task and wait until it is terminal
    ///
    /// A running process is asked to stop and killed after
    /// `terminate_timeout`. Cancelling a terminal task returns its snapshot
    /// unchanged.
    pub async fn cancel(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        let mut snapshot_rx = {
            let table = self.lock_table();
            let entry = table.tasks.get(&task_id).ok_or(Error::UnknownTask(task_id))?;
            if entry.current().is_terminal() {
                return Ok(entry.current());
            }
            entry.cancel.cancel();
            entry.snapshot.clone()
        };

        tracing::info!(task_id = task_id.0, "Cancelling download");

        if snapshot_rx.wait_for(TaskSnapshot::is_terminal).await.is_err() {
            tracing::warn!(task_id = task_id.0, "Task driver ended without a final state");
        }
        self.poll(task_id)
    }

    /// Answer the prompt a task is waiting on (Steam Guard or two-factor code)
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for an empty or multi-line answer
    /// - [`Error::InvalidState`] unless the task is in the `awaiting_input` phase
    pub fn submit_input(&self, task_id: TaskId, input: impl Into<String>) -> Result<()> {
        let input = input.into();
        let answer = input.trim();
        if answer.is_empty() || answer.contains(['\n', '\r']) {
            return Err(Error::InvalidRequest(
                "input must be a single non-empty line".to_string(),
            ));
        }

        let table = self.lock_table();
        let entry = table.tasks.get(&task_id).ok_or(Error::UnknownTask(task_id))?;
        let snapshot = entry.current();
        if snapshot.is_terminal() || snapshot.progress.prompt != Some(InputPrompt::GuardCode) {
            return Err(Error::InvalidState {
                task_id,
                operation: "submit input".to_string(),
                state: describe(&snapshot),
            });
        }

        entry
            .input_tx
            .send(answer.to_string())
            .map_err(|_| Error::InvalidState {
                task_id,
                operation: "submit input".to_string(),
                state: describe(&snapshot),
            })?;
        tracing::info!(task_id = task_id.0, "Input submitted");
        Ok(())
    }

    /// Files downloaded by a succeeded task
    pub fn artifacts(&self, task_id: TaskId) -> Result<Vec<ArtifactRef>> {
        let install_dir: PathBuf = {
            let table = self.lock_table();
            let entry = table.tasks.get(&task_id).ok_or(Error::UnknownTask(task_id))?;
            let snapshot = entry.current();
            if snapshot.progress.state != TaskState::Succeeded {
                return Err(Error::InvalidState {
                    task_id,
                    operation: "list artifacts of".to_string(),
                    state: describe(&snapshot),
                });
            }
            entry.install_dir.clone()
        };
        Ok(self.locator.locate(&install_dir).iter().collect())
    }

    /// Whether SteamCMD is available right now
    pub fn tool_status(&self) -> ToolStatus {
        self.tool.status()
    }

    /// Install SteamCMD unless an executable is already available
    pub async fn install_tool(&self) -> Result<ToolStatus> {
        let was_installed = self.tool.locate().is_some();
        let path = self
            .tool
            .install(|percent| tracing::debug!(percent, "Downloading SteamCMD"))
            .await?;
        if !was_installed {
            self.emit_event(Event::ToolInstalled { path });
        }
        Ok(self.tool.status())
    }
}

fn describe(snapshot: &TaskSnapshot) -> String {
    if snapshot.is_terminal() {
        snapshot.progress.state.to_string()
    } else {
        snapshot.progress.phase.to_string()
    }
}
