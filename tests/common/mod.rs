//! Common test utilities for steamcmd-dl end-to-end tests

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use steamcmd_dl::{Config, Orchestrator, api};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A running API server backed by a fake SteamCMD
pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
    pub orchestrator: Arc<Orchestrator>,
    pub temp_dir: TempDir,
    pub server: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Write an executable shell script standing in for SteamCMD.
///
/// The script sees `$INSTALL_DIR` set from `+force_install_dir`.
pub fn write_fake_steamcmd(dir: &Path, body: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
INSTALL_DIR=""
while [ $# -gt 0 ]; do
  if [ "$1" = "+force_install_dir" ]; then
    INSTALL_DIR="$2"
    shift
  fi
  shift
done
{body}"#
    );
    let path = dir.join("steamcmd.sh");
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Bind to a free port and serve the full router over a fake SteamCMD
pub async fn spawn_server(script_body: &str) -> TestServer {
    let (listener, base_url, orchestrator, temp_dir) = prepare(script_body).await;
    let app = api::create_router(orchestrator.clone(), orchestrator.get_config());
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    TestServer {
        base_url,
        client: reqwest::Client::new(),
        orchestrator,
        temp_dir,
        server,
    }
}

/// Like [`spawn_server`], but the server shuts down the way the binary does:
/// sending on the returned channel shuts the orchestrator down, then the
/// server drains and exits.
pub async fn spawn_server_with_shutdown(script_body: &str) -> (TestServer, oneshot::Sender<()>) {
    let (listener, base_url, orchestrator, temp_dir) = prepare(script_body).await;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let signal = {
        let orchestrator = orchestrator.clone();
        async move {
            stop_rx.await.ok();
            orchestrator.shutdown().await.unwrap();
        }
    };
    let serve = api::serve_with_shutdown(
        listener,
        orchestrator.clone(),
        orchestrator.get_config(),
        signal,
    );
    let server = tokio::spawn(async move {
        serve.await.unwrap();
    });

    let server = TestServer {
        base_url,
        client: reqwest::Client::new(),
        orchestrator,
        temp_dir,
        server,
    };
    (server, stop_tx)
}

async fn prepare(script_body: &str) -> (TcpListener, String, Arc<Orchestrator>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let bin = temp_dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.tool.steamcmd_path = Some(write_fake_steamcmd(&bin, script_body));
    config.tool.tool_dir = temp_dir.path().join("tool");
    config.tool.search_path = false;
    config.tool.auto_install = false;
    config.tasks.poll_interval = Duration::from_millis(20);
    config.tasks.terminate_timeout = Duration::from_millis(500);
    config.api.bind_address = addr;
    config.api.public_url = Some(base_url.clone());

    let orchestrator = Arc::new(Orchestrator::new(config).await.unwrap());
    (listener, base_url, orchestrator, temp_dir)
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Poll `GET /downloads/:id` until the task is terminal (10 s limit)
    pub async fn wait_for_terminal(&self, task_id: u64) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot: serde_json::Value = self
                .client
                .get(self.url(&format!("/downloads/{task_id}")))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if snapshot["state"] != "running" {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} did not finish: {snapshot}"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
