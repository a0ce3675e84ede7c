//! # Guest Agent
//!
//! Runs the database service lifecycle on a guest and reports its status

use anyhow::Context;
use clap::Parser;
use guest_agent::{router, AgentConfig, AgentState};
use guest_core::BUILD_INFO;
use guest_lifecycle::{
    spawn_reconciler, CommandRunner, CommandVolumeProvider, FileStatusStore, LifecycleManager,
    ScriptedRunner, ShellRunner, TrackerSlot,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::parse();
    info!("Starting Guest Agent {}", BUILD_INFO);

    let profile = Arc::new(config.load_profile()?);
    let runner: Arc<dyn CommandRunner> = if config.fake_commands {
        warn!("Command execution disabled, commands are only recorded");
        Arc::new(ScriptedRunner::new())
    } else {
        Arc::new(ShellRunner::new())
    };

    let store = FileStatusStore::new(&config.state_dir);
    let slot = TrackerSlot::new(
        config.instance_id.clone(),
        Arc::new(store),
        Arc::clone(&runner),
        Arc::clone(&profile),
    );
    let tracker = slot
        .init()
        .await
        .with_context(|| format!("loading status from {}", config.state_dir.display()))?;

    let volumes = Arc::new(CommandVolumeProvider::new(
        Arc::clone(&runner),
        Arc::clone(&profile),
    ));
    let manager = Arc::new(LifecycleManager::new(
        Arc::clone(&tracker),
        runner,
        profile,
        volumes,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = spawn_reconciler(tracker, config.reconcile_interval(), shutdown_rx);

    let app = router(AgentState::new(manager));
    let listener = TcpListener::bind(config.listen).await?;
    info!("Guest Agent listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    reconciler.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
