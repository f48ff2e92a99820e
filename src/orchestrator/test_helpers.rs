//! Shared test helpers: fake SteamCMD scripts and test orchestrators.

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::types::{TaskId, TaskSnapshot};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Prelude of every fake: records the arguments next to the script and
/// extracts the `+force_install_dir` value into `$INSTALL_DIR`.
const FAKE_PRELUDE: &str = r#"#!/bin/sh
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
INSTALL_DIR=""
while [ $# -gt 0 ]; do
  if [ "$1" = "+force_install_dir" ]; then
    INSTALL_DIR="$2"
    shift
  fi
  shift
done
"#;

/// Anonymous download printing 10% and 55% before succeeding
pub(crate) const SUCCESS_SCRIPT: &str = r#"
echo "Redirecting stderr to '/tmp/stderr.txt'"
echo "Downloading...10%"
sleep 0.3
echo "Downloading...55%"
sleep 0.3
mkdir -p "$INSTALL_DIR/bin"
echo "payload" > "$INSTALL_DIR/bin/game.bin"
mkdir -p "$INSTALL_DIR/steamapps"
echo "manifest" > "$INSTALL_DIR/steamapps/appmanifest.acf"
echo "Success"
"#;

/// Runs until killed
pub(crate) const LONG_RUNNING_SCRIPT: &str = r#"
echo "Downloading...5%"
exec sleep 30
"#;

/// Account login: password, then a Steam Guard code, then the update
pub(crate) const ACCOUNT_SCRIPT: &str = r#"
read login_cmd
echo "$login_cmd" > "$(dirname "$0")/login.txt"
echo "Logging in user 'gaben' to Steam Public..."
printf 'password: '
read password
if [ "$password" != "hunter2" ]; then
  echo "FAILED (Invalid Password)"
  exit 5
fi
printf 'Steam Guard code:'
read code
if [ "$code" != "ABCDE" ]; then
  echo "FAILED (Invalid Login Auth Code)"
  exit 5
fi
echo "Waiting for user info...OK"
read update_cmd
echo "$update_cmd" > "$(dirname "$0")/update.txt"
mkdir -p "$INSTALL_DIR"
echo "payload" > "$INSTALL_DIR/game.bin"
echo "Success! App '480' fully installed."
read quit_cmd
exit 0
"#;

/// Write an executable fake SteamCMD into `dir`
pub(crate) fn write_fake_steamcmd(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("steamcmd.sh");
    std::fs::write(&path, format!("{}{}", FAKE_PRELUDE, body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Configuration rooted in `temp_dir` with fast polling
pub(crate) fn test_config(temp_dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.join("downloads");
    config.tool.tool_dir = temp_dir.join("tool");
    config.tool.search_path = false;
    config.tool.auto_install = false;
    config.tasks.poll_interval = Duration::from_millis(20);
    config.tasks.terminate_timeout = Duration::from_millis(500);
    config.tasks.max_concurrent_tasks = 3;
    config
}

/// Orchestrator whose SteamCMD is a fake script running `body`.
/// Returns the orchestrator and the tempdir (which must be kept alive).
pub(crate) async fn create_test_orchestrator(body: &str) -> (Orchestrator, TempDir) {
    create_test_orchestrator_with(body, |_| {}).await
}

/// Like [`create_test_orchestrator`] with a chance to adjust the config
pub(crate) async fn create_test_orchestrator_with<F>(
    body: &str,
    adjust: F,
) -> (Orchestrator, TempDir)
where
    F: FnOnce(&mut Config),
{
    let temp_dir = TempDir::new().unwrap();
    let tool_dir = temp_dir.path().join("bin");
    std::fs::create_dir_all(&tool_dir).unwrap();
    let script = write_fake_steamcmd(&tool_dir, body);

    let mut config = test_config(temp_dir.path());
    config.tool.steamcmd_path = Some(script);
    adjust(&mut config);

    let orchestrator = Orchestrator::new(config).await.unwrap();
    (orchestrator, temp_dir)
}

/// Poll until the task is terminal
pub(crate) async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    task_id: TaskId,
) -> TaskSnapshot {
    wait_until(orchestrator, task_id, TaskSnapshot::is_terminal).await
}

/// Poll until `condition` holds for the task's snapshot (10 s limit)
pub(crate) async fn wait_until<F>(
    orchestrator: &Orchestrator,
    task_id: TaskId,
    condition: F,
) -> TaskSnapshot
where
    F: Fn(&TaskSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = orchestrator.poll(task_id).unwrap();
        if condition(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for task {task_id}; last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
