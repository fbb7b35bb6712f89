//! hostpulse_agent: serves /ws telemetry, /terminal shells and the REST endpoints.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hostpulse_agent::build_router;
use hostpulse_agent::collector::Collector;
use hostpulse_agent::config::AgentConfig;
use hostpulse_agent::exec::{CommandRunner, SystemRunner};
use hostpulse_agent::host::LinuxHost;
use hostpulse_agent::pty::NativePtySpawner;
use hostpulse_agent::state::AppState;
use hostpulse_agent::terminal::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hostpulse_agent=info")),
        )
        .init();

    let config = match AgentConfig::from_env().apply_args(std::env::args()) {
        Ok(c) => c,
        Err(usage) => {
            let help = std::env::args().any(|a| a == "-h" || a == "--help");
            if help {
                println!("{usage}");
                return Ok(());
            }
            eprintln!("{usage}");
            std::process::exit(2);
        }
    };

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let host = Arc::new(LinuxHost::new(
        runner.clone(),
        config.collector.command_timeout,
    ));
    let collector = Collector::new(host, config.collector.clone());
    let sessions = Arc::new(SessionManager::new(
        Arc::new(NativePtySpawner::from_config(&config.terminal)),
        config.terminal.clone(),
    ));
    sessions.start_reaper();

    let addr = config.socket_addr();
    let state = AppState::new(collector.clone(), sessions.clone(), runner, config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "hostpulse agent listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    collector.shutdown();
    sessions.stop_reaper();
    let killed = sessions.kill_all_sessions();
    info!(killed, "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received, shutting down");
}
