//! Per-task driver.
//!
//! Each task runs in its own tokio task: wait for a worker slot, make sure
//! SteamCMD is present, spawn it, then poll its output on a fixed interval
//! until it exits or the task is cancelled. Intermediate snapshots go out
//! through a `watch` channel; the terminal snapshot is published together
//! with the removal of the task from the active indexes, under the table
//! lock, so no caller ever sees a finished task that still blocks a restart.

use crate::process::ProcessHandle;
use crate::progress::ProgressParser;
use crate::tool;
use crate::types::{
    ContentId, Credentials, Event, FailureReason, InputPrompt, Login, Phase, ProgressSnapshot,
    TaskId, TaskSnapshot, TaskState, TaskWarning,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;

/// Everything a driver needs, handed over by `start`
pub(crate) struct TaskContext {
    pub(crate) task_id: TaskId,
    pub(crate) content_id: ContentId,
    /// Relative to the download root
    pub(crate) install_dir: PathBuf,
    pub(crate) absolute_dir: PathBuf,
    pub(crate) login: Login,
    pub(crate) cancel: CancellationToken,
    pub(crate) input_rx: mpsc::UnboundedReceiver<String>,
    pub(crate) publisher: watch::Sender<TaskSnapshot>,
    pub(crate) started_at: DateTime<Utc>,
}

/// Mutable state of one run
struct TaskRun {
    task_id: TaskId,
    content_id: ContentId,
    started_at: DateTime<Utc>,
    parser: ProgressParser,
    /// Last progress sent to pollers
    published: ProgressSnapshot,
    output_tail: Vec<String>,
    failure: Option<FailureReason>,
    publisher: watch::Sender<TaskSnapshot>,
}

impl TaskRun {
    fn fail(&mut self, reason: FailureReason, message: impl Into<String>) {
        if self.parser.conclude(TaskState::Failed, message) {
            self.failure = Some(reason);
        }
    }

    fn snapshot(&self, progress: ProgressSnapshot) -> TaskSnapshot {
        let mut snapshot =
            TaskSnapshot::new(self.task_id, self.content_id, progress, self.started_at);
        snapshot.output_tail = self.output_tail.clone();
        snapshot
    }
}

/// Stdin conversation state for account logins
struct LoginDialog {
    credentials: Option<Credentials>,
    password_sent: bool,
    update_sent: bool,
}

impl Orchestrator {
    pub(crate) async fn run_task(self, context: TaskContext) {
        let TaskContext {
            task_id,
            content_id,
            install_dir,
            absolute_dir,
            login,
            cancel,
            mut input_rx,
            publisher,
            started_at,
        } = context;

        let mut run = TaskRun {
            task_id,
            content_id,
            started_at,
            parser: ProgressParser::with_grammar(self.grammar.clone()),
            published: ProgressSnapshot::queued(),
            output_tail: Vec::new(),
            failure: None,
            publisher,
        };

        self.drive(&mut run, &absolute_dir, login, &cancel, &mut input_rx)
            .await;
        self.finish_task(run, &install_dir);
    }

    async fn drive(
        &self,
        run: &mut TaskRun,
        absolute_dir: &Path,
        login: Login,
        cancel: &CancellationToken,
        input_rx: &mut mpsc::UnboundedReceiver<String>,
    ) {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                run.parser.conclude(TaskState::Cancelled, "Cancelled before start");
                return;
            }
            permit = self.workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    run.fail(FailureReason::SpawnFailed, "Worker pool is closed");
                    return;
                }
            },
        };

        let Some(program) = self.preflight(run, cancel).await else {
            return;
        };

        if let Err(e) = tokio::fs::create_dir_all(absolute_dir).await {
            run.fail(
                FailureReason::SpawnFailed,
                format!(
                    "Cannot create install directory {}: {}",
                    absolute_dir.display(),
                    e
                ),
            );
            return;
        }

        let args = tool::launch_args(absolute_dir, run.content_id, &login);
        let mut handle = match self.runner.start(&program, &args, None) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(task_id = run.task_id.0, error = %e, "Failed to start SteamCMD");
                run.fail(
                    FailureReason::SpawnFailed,
                    format!(
                        "{}. Install SteamCMD or point STEAMCMD_PATH at a working executable",
                        e
                    ),
                );
                return;
            }
        };

        tracing::info!(
            task_id = run.task_id.0,
            content_id = run.content_id.get(),
            pid = handle.pid(),
            program = %program.display(),
            "SteamCMD started"
        );
        run.parser.set_phase(Phase::Starting, "SteamCMD started");
        self.publish(run);

        self.supervise(run, &mut handle, login, cancel, input_rx).await;
        run.output_tail = handle.tail().lines();
    }

    /// Locate SteamCMD, installing it when allowed. `None` means the run has
    /// already concluded.
    async fn preflight(&self, run: &mut TaskRun, cancel: &CancellationToken) -> Option<PathBuf> {
        if let Some(path) = self.tool.locate() {
            return Some(path);
        }
        if !self.tool.config().auto_install {
            run.fail(
                FailureReason::SpawnFailed,
                "SteamCMD was not found. Set STEAMCMD_PATH, put steamcmd on PATH or enable automatic installation",
            );
            return None;
        }

        run.parser
            .set_phase(Phase::Installing, "Installing SteamCMD");
        self.publish(run);

        let outcome = {
            let publisher = &run.publisher;
            let base = run.snapshot(run.parser.snapshot());
            let on_progress = move |percent: f64| {
                let mut snapshot = base.clone();
                snapshot.progress.message = format!("Installing SteamCMD ({:.0}%)", percent);
                snapshot.updated_at = Utc::now();
                publisher.send_replace(snapshot.with_elapsed(Utc::now()));
            };
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.tool.ensure_installed(on_progress) => Some(result),
            }
        };

        match outcome {
            None => {
                run.parser
                    .conclude(TaskState::Cancelled, "Cancelled while installing SteamCMD");
                None
            }
            Some(Ok(path)) => {
                self.emit_event(Event::ToolInstalled { path: path.clone() });
                Some(path)
            }
            Some(Err(e)) => {
                tracing::error!(task_id = run.task_id.0, error = %e, "SteamCMD installation failed");
                run.fail(
                    FailureReason::InstallFailed,
                    format!(
                        "Failed to install SteamCMD: {}. Set STEAMCMD_PATH to an existing installation or retry later",
                        e
                    ),
                );
                None
            }
        }
    }

    /// Poll the process until it exits or the task is cancelled, then settle
    /// the final state
    async fn supervise(
        &self,
        run: &mut TaskRun,
        handle: &mut ProcessHandle,
        login: Login,
        cancel: &CancellationToken,
        input_rx: &mut mpsc::UnboundedReceiver<String>,
    ) {
        let grace = self.config.tasks.terminate_timeout;
        let mut dialog = match login {
            Login::Account(credentials) => LoginDialog {
                credentials: Some(credentials),
                password_sent: false,
                update_sent: false,
            },
            Login::Anonymous => LoginDialog {
                credentials: None,
                password_sent: false,
                update_sent: true,
            },
        };

        if let Some(credentials) = &dialog.credentials {
            if let Err(e) = handle
                .write_line(&tool::login_command(credentials.username()))
                .await
            {
                tracing::warn!(task_id = run.task_id.0, error = %e, "Failed to send login command");
            }
            run.parser.set_phase(Phase::LoggingIn, "Logging in to Steam");
            self.publish(run);
        }

        let mut ticker = tokio::time::interval(self.config.tasks.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut terminal_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    run.parser.conclude(TaskState::Cancelled, "Cancelled");
                    if let Err(e) = handle.terminate(grace).await {
                        tracing::warn!(task_id = run.task_id.0, error = %e, "Failed to terminate SteamCMD");
                    }
                    break;
                }
                Some(answer) = input_rx.recv() => {
                    if run.parser.snapshot().prompt != Some(InputPrompt::GuardCode) {
                        tracing::debug!(task_id = run.task_id.0, "Ignoring input, no prompt pending");
                        continue;
                    }
                    match handle.write_line(&answer).await {
                        Ok(()) => {
                            run.parser.resume_after_input();
                            self.publish(run);
                        }
                        Err(e) => {
                            tracing::warn!(task_id = run.task_id.0, error = %e, "Failed to send input");
                        }
                    }
                }
                _ = ticker.tick() => {
                    let chunk = handle.poll_output();
                    if !chunk.is_empty() {
                        run.parser.feed(&chunk);
                        run.output_tail = handle.tail().lines();
                    }
                    self.converse(run, handle, &mut dialog).await;
                    self.publish(run);

                    if !handle.is_alive() {
                        break;
                    }
                    if run.parser.is_terminal() {
                        let since = *terminal_since.get_or_insert_with(|| {
                            handle.close_stdin();
                            Instant::now()
                        });
                        if since.elapsed() >= grace {
                            tracing::debug!(task_id = run.task_id.0, "SteamCMD did not exit after finishing, stopping it");
                            if let Err(e) = handle.terminate(grace).await {
                                tracing::warn!(task_id = run.task_id.0, error = %e, "Failed to terminate SteamCMD");
                            }
                            break;
                        }
                    }
                }
            }
        }

        // credentials are zeroed on drop
        drop(dialog);

        drain(handle, grace, run.task_id).await;
        let rest = handle.poll_output();
        run.parser.feed(&rest);
        run.parser.finish();
        self.settle_exit(run, handle.exit_status());
    }

    /// Answer password prompts and queue the update once logged in
    async fn converse(
        &self,
        run: &mut TaskRun,
        handle: &mut ProcessHandle,
        dialog: &mut LoginDialog,
    ) {
        if run.parser.snapshot().prompt == Some(InputPrompt::Password) {
            match (&dialog.credentials, dialog.password_sent) {
                (Some(credentials), false) => {
                    dialog.password_sent = true;
                    match handle.write_line(credentials.password()).await {
                        Ok(()) => run.parser.resume_after_input(),
                        Err(e) => {
                            tracing::warn!(task_id = run.task_id.0, error = %e, "Failed to send password")
                        }
                    }
                }
                _ => run.fail(
                    FailureReason::ToolReported,
                    "Login rejected: SteamCMD asked for the password again. Check the account credentials",
                ),
            }
        }

        if !dialog.update_sent && run.parser.is_logged_in() {
            dialog.update_sent = true;
            dialog.credentials = None;
            for line in [tool::update_command(run.content_id), tool::QUIT_COMMAND.to_string()] {
                if let Err(e) = handle.write_line(&line).await {
                    tracing::warn!(task_id = run.task_id.0, error = %e, "Failed to send command");
                }
            }
            tracing::info!(task_id = run.task_id.0, "Logged in, update requested");
        }
    }

    /// Decide the outcome from the exit status when the output did not
    fn settle_exit(&self, run: &mut TaskRun, status: Option<ExitStatus>) {
        match run.parser.snapshot().state {
            TaskState::Succeeded | TaskState::Cancelled => {}
            TaskState::Failed => {
                run.failure.get_or_insert(FailureReason::ToolReported);
            }
            TaskState::Running => match status.and_then(|s| s.code()) {
                Some(0) => {
                    run.parser
                        .conclude(TaskState::Succeeded, "SteamCMD finished");
                }
                Some(code) => run.fail(
                    FailureReason::ExitCode { code },
                    format!(
                        "SteamCMD exited with code {} without reporting success; see the output tail",
                        code
                    ),
                ),
                None => run.fail(
                    FailureReason::Terminated,
                    "SteamCMD was terminated before reporting success",
                ),
            },
        }
    }

    /// Send the current progress to pollers and subscribers if it changed.
    /// Terminal progress is held back for `finish_task`.
    fn publish(&self, run: &mut TaskRun) {
        let progress = run.parser.snapshot();
        if progress.is_terminal() || progress == run.published {
            return;
        }
        let previous = std::mem::replace(&mut run.published, progress.clone());
        let task_id = run.task_id;

        if progress.phase != previous.phase {
            tracing::info!(
                task_id = task_id.0,
                content_id = run.content_id.get(),
                phase = %progress.phase,
                percent = progress.percent,
                message = %progress.message,
                "Task phase changed"
            );
            self.emit_event(Event::PhaseChanged {
                task_id,
                phase: progress.phase,
            });
        }
        if progress.percent > previous.percent {
            tracing::debug!(
                task_id = task_id.0,
                content_id = run.content_id.get(),
                phase = %progress.phase,
                percent = progress.percent,
                message = %progress.message,
                "Task progress"
            );
            self.emit_event(Event::Progress {
                task_id,
                percent: progress.percent,
            });
        }
        if let Some(prompt) = progress.prompt
            && previous.prompt != Some(prompt)
        {
            tracing::info!(task_id = task_id.0, ?prompt, "Task is waiting for input");
            self.emit_event(Event::InputRequired { task_id, prompt });
        }

        let snapshot = run.snapshot(progress);
        run.publisher.send_replace(snapshot);
    }

    /// Build the terminal snapshot, release the content id and publish
    fn finish_task(&self, mut run: TaskRun, install_dir: &Path) {
        if !run.parser.is_terminal() {
            run.fail(FailureReason::Terminated, "Task ended unexpectedly");
        }
        let progress = run.parser.snapshot();
        let task_id = run.task_id;
        let content_id = run.content_id;

        let finished_at = Utc::now();
        let mut snapshot = run.snapshot(progress);
        snapshot.failure = run.failure.take();
        snapshot.finished_at = Some(finished_at);
        let mut snapshot = snapshot.with_elapsed(finished_at);

        if snapshot.progress.is_success() {
            let count = self.locator.locate(install_dir).iter().count();
            snapshot.artifact_count = Some(count);
            if count == 0 {
                tracing::warn!(
                    task_id = task_id.0,
                    content_id = content_id.get(),
                    install_dir = %install_dir.display(),
                    "SteamCMD reported success but no files were found"
                );
                snapshot.warning = Some(TaskWarning::NoArtifacts);
            }
        }

        {
            let mut table = self.lock_table();
            if table.active_by_content.get(&content_id) == Some(&task_id) {
                table.active_by_content.remove(&content_id);
            }
            if table.active_by_dir.get(install_dir) == Some(&task_id) {
                table.active_by_dir.remove(install_dir);
            }
            run.publisher.send_replace(snapshot.clone());
        }

        match snapshot.progress.state {
            TaskState::Succeeded => {
                let artifact_count = snapshot.artifact_count.unwrap_or(0);
                tracing::info!(
                    task_id = task_id.0,
                    content_id = content_id.get(),
                    artifact_count,
                    elapsed_secs = snapshot.elapsed_secs,
                    "Download finished"
                );
                self.emit_event(Event::Succeeded {
                    task_id,
                    artifact_count,
                });
            }
            TaskState::Cancelled => {
                tracing::info!(task_id = task_id.0, content_id = content_id.get(), "Download cancelled");
                self.emit_event(Event::Cancelled { task_id });
            }
            TaskState::Failed | TaskState::Running => {
                tracing::warn!(
                    task_id = task_id.0,
                    content_id = content_id.get(),
                    failure = ?snapshot.failure,
                    message = %snapshot.progress.message,
                    "Download failed"
                );
                self.emit_event(Event::Failed {
                    task_id,
                    message: snapshot.progress.message.clone(),
                });
            }
        }
    }
}

/// Wait for the output streams to close; a grandchild holding the pipes
/// open must not stall the task forever
async fn drain(handle: &mut ProcessHandle, grace: Duration, task_id: TaskId) {
    if tokio::time::timeout(grace, handle.wait_drained())
        .await
        .is_err()
    {
        tracing::debug!(task_id = task_id.0, "Output streams still open after exit");
    }
}
