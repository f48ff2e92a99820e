//! Retention of finished tasks and shutdown coordination.

use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{Orchestrator, TaskTable};

/// Extra time granted on top of `terminate_timeout` while shutting down
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

impl Orchestrator {
    /// Forget finished tasks whose final snapshot was observed longer than
    /// `task_retention` ago
    pub(crate) fn prune_finished(&self, table: &mut TaskTable) {
        let retention = self.config.tasks.task_retention;
        let before = table.tasks.len();
        table.tasks.retain(|_, entry| {
            entry
                .observed_terminal_at
                .is_none_or(|seen| seen.elapsed() < retention)
        });
        let pruned = before - table.tasks.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned finished tasks");
        }
    }

    /// Number of tasks that have not reached a terminal state
    pub fn active_count(&self) -> usize {
        self.lock_table().active_by_content.len()
    }

    /// Gracefully shut down the orchestrator
    ///
    /// 1. Stops accepting new downloads
    /// 2. Cancels every active task (SIGTERM, then SIGKILL after `terminate_timeout`)
    /// 3. Waits for the tasks to settle, bounded by `terminate_timeout` plus a few seconds
    /// 4. Emits [`Event::Shutdown`], which ends the `/events` streams
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);

        {
            let table = self.lock_table();
            for task_id in table.active_by_content.values() {
                if let Some(entry) = table.tasks.get(task_id) {
                    tracing::debug!(task_id = task_id.0, "Cancelling task for shutdown");
                    entry.cancel.cancel();
                }
            }
        }

        let limit = self.config.tasks.terminate_timeout + SHUTDOWN_SLACK;
        match tokio::time::timeout(limit, self.wait_for_active_tasks()).await {
            Ok(()) => tracing::info!("All active tasks stopped"),
            Err(_) => tracing::warn!(
                remaining = self.active_count(),
                "Timeout waiting for tasks to stop, proceeding with shutdown"
            ),
        }

        self.emit_event(Event::Shutdown);
        self.stopped.cancel();
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_tasks(&self) {
        loop {
            let active = self.active_count();
            if active == 0 {
                return;
            }
            tracing::debug!(active, "Waiting for active tasks to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
