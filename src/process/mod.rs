//! Child process supervision for the external tool
//!
//! [`ProcessRunner`] is the only place that spawns OS processes. A spawned
//! [`ProcessHandle`] owns the child exclusively: output is pumped by two reader
//! tasks (stdout and stderr) into a channel that [`ProcessHandle::poll_output`]
//! drains without blocking, merging the streams line by line. The child is
//! spawned with `kill_on_drop`, so a handle that is dropped without
//! `terminate` still kills the process and lets tokio reap it.

mod lines;
mod tail;

pub use lines::{MAX_LINE_LEN, OutputStream};
pub use tail::OutputTail;

use lines::{LineAssembler, ReaderEvent};

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Launches external tools as supervised child processes
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    tail_lines: usize,
}

impl ProcessRunner {
    /// Create a runner whose handles keep the last `tail_lines` output lines
    pub fn new(tail_lines: usize) -> Self {
        Self { tail_lines }
    }

    /// Spawn `program` with `args` in `working_dir`
    ///
    /// stdin, stdout and stderr are piped. Fails with [`Error::Spawn`] when the
    /// executable is missing or cannot be executed.
    pub fn start<I, S>(
        &self,
        program: &Path,
        args: I,
        working_dir: Option<&Path>,
    ) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, output_tx));
        }

        tracing::debug!(program = %program.display(), pid, "Spawned child process");

        Ok(ProcessHandle {
            program: program.to_path_buf(),
            child,
            pid,
            stdin,
            output_rx,
            lines: LineAssembler::default(),
            readers,
            tail: OutputTail::new(self.tail_lines),
            status: None,
        })
    }
}

/// Exclusive ownership of one live child process
#[derive(Debug)]
pub struct ProcessHandle {
    program: PathBuf,
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    output_rx: mpsc::UnboundedReceiver<ReaderEvent>,
    lines: LineAssembler,
    readers: Vec<JoinHandle<()>>,
    tail: OutputTail,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// OS process id (None once the process has been reaped)
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program this handle was spawned from
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Text produced since the last call; empty when nothing new arrived
    ///
    /// stdout and stderr are merged without splicing their lines together,
    /// so the result can be parsed as one stream.
    pub fn poll_output(&mut self) -> String {
        while let Ok(event) = self.output_rx.try_recv() {
            match event {
                ReaderEvent::Data(stream, text) => self.lines.push(stream, &text),
                ReaderEvent::Closed(stream) => self.lines.close(stream),
            }
        }
        let collected = self.lines.take();
        if !collected.is_empty() {
            self.tail.push(&collected);
        }
        collected
    }

    /// Whether the process is still running
    pub fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to query child process state");
                false
            }
        }
    }

    /// Exit code once the process has terminated (None while running or when
    /// killed by a signal)
    pub fn exit_code(&mut self) -> Option<i32> {
        self.is_alive();
        self.status.and_then(|status| status.code())
    }

    /// Full exit status once the process has terminated
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.is_alive();
        self.status
    }

    /// Last captured output lines
    pub fn tail(&self) -> &OutputTail {
        &self.tail
    }

    /// Write one line to the child's stdin
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::ExternalTool("stdin of the tool is closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the child's stdin so it sees end-of-file
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Wait until both output streams reached end-of-file
    ///
    /// Call after the process exited so the next [`poll_output`](Self::poll_output)
    /// returns everything the process wrote.
    pub async fn wait_drained(&mut self) {
        for reader in self.readers.drain(..) {
            if let Err(e) = reader.await {
                tracing::debug!(pid = self.pid, error = %e, "Output reader task ended abnormally");
            }
        }
    }

    /// Stop the process: SIGTERM first, SIGKILL after `grace`
    ///
    /// Always reaps the process before returning.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        self.close_stdin();
        if !self.is_alive() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid
            && let Ok(pid) = libc::pid_t::try_from(pid)
        {
            // SAFETY: kill(2) only sends a signal; the pid belongs to our own
            // unreaped child, so it cannot have been recycled.
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!(
                    pid,
                    error = %std::io::Error::last_os_error(),
                    "SIGTERM failed"
                );
            }
        }

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    grace_secs = grace.as_secs_f64(),
                    "Process ignored termination request, killing"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };
        self.status = Some(status);
        Ok(())
    }
}

fn spawn_reader<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<ReaderEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut pending = Vec::new();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let text = drain_utf8(&mut pending);
                    if !text.is_empty() && tx.send(ReaderEvent::Data(stream, text)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(?stream, error = %e, "Reading child output failed");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending).into_owned();
            let _ = tx.send(ReaderEvent::Data(stream, text));
        }
        let _ = tx.send(ReaderEvent::Closed(stream));
    })
}

/// Take the decodable prefix of `pending`, keeping an incomplete trailing
/// UTF-8 sequence for the next read.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let rest = pending.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}
