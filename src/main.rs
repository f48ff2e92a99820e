use std::process::ExitCode;
use std::sync::Arc;
use steamcmd_dl::{Config, Orchestrator, api};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "steamcmd-dl stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> steamcmd_dl::Result<()> {
    let config = Config::from_env()?;
    let orchestrator = Arc::new(Orchestrator::new(config).await?);
    let config = orchestrator.get_config();

    let tool = orchestrator.tool_status();
    match &tool.path {
        Some(path) => tracing::info!(path = %path.display(), "Using SteamCMD"),
        None if tool.auto_install => {
            tracing::info!("SteamCMD not found; it will be installed before the first download")
        }
        None => tracing::warn!("SteamCMD not found and automatic installation is disabled"),
    }
    tracing::info!(public_url = %config.api.base_url(), "Files are linked under this URL");

    // SIGINT/SIGTERM cancels the running downloads first; the server then
    // drains, which needs the event streams closed by the shutdown
    let shutdown = {
        let orchestrator = (*orchestrator).clone();
        async move {
            if let Err(e) = steamcmd_dl::run_with_shutdown(orchestrator).await {
                tracing::error!(error = %e, "Shutdown failed");
            }
        }
    };
    let server = api::start_api_server_with_shutdown(orchestrator.clone(), config, shutdown);
    let served = server.await;
    if served.is_err() {
        orchestrator.shutdown().await?;
    }
    served
}
