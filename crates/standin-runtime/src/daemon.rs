//! Process wiring for `standin serve`.

use std::sync::Arc;

use tokio::sync::watch;

use standin_agent::ChromiumAgent;
use standin_core::{HeartbeatTracker, SpawnRateLimiter, TransitionMachine};

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::controller::TransitionController;
use crate::server::{self, AppState};
use crate::supervisor::{AgentSupervisor, KillOutcome};

/// Run the server and control loop until ctrl-c or SIGTERM, then retract
/// the agent within the shutdown deadline.
pub async fn run_daemon(config: RuntimeConfig) -> anyhow::Result<()> {
    let clock = Clock::new();
    let agent = ChromiumAgent::new(config.launch.clone());
    let supervisor = Arc::new(AgentSupervisor::new(
        agent,
        config.target_url.clone(),
        SpawnRateLimiter::new(config.max_spawns_per_minute),
        clock,
    ));
    let controller = Arc::new(TransitionController::new(
        TransitionMachine::new(config.debounce_ms),
        HeartbeatTracker::new(config.heartbeat_timeout_ms),
        Arc::clone(&supervisor),
        clock,
        config.check_interval,
    ));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.listen))?;
    let mount_display = if config.mount.is_empty() { "/" } else { &config.mount };
    tracing::info!(
        addr = %listener.local_addr()?,
        mount = mount_display,
        agent_url = %supervisor.target_url(),
        "listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let app = server::router(
        AppState::new(Arc::clone(&controller), &config.mount, config.beacon_interval_ms),
        &config.mount,
    );
    let mut server_handle = tokio::spawn(server::serve(listener, app, stop_rx.clone()));
    let mut loop_handle = tokio::spawn(Arc::clone(&controller).run(stop_rx));

    tokio::select! {
        result = wait_for_signal() => result?,
        _ = &mut loop_handle => tracing::warn!("control loop exited unexpectedly"),
        res = &mut server_handle => match res {
            Ok(Err(e)) => tracing::error!(error = %e, "server error"),
            _ => tracing::warn!("server exited unexpectedly"),
        },
    }

    let _ = stop_tx.send(true);
    match controller.shutdown(config.shutdown_deadline).await {
        Some(KillOutcome::Released) => tracing::info!("agent retracted"),
        Some(KillOutcome::NoAgent) | None => {}
        Some(outcome) => tracing::warn!(?outcome, "agent retraction incomplete"),
    }

    if !server_handle.is_finished() {
        let _ = tokio::time::timeout(config.shutdown_deadline, server_handle).await;
    }
    tracing::info!("standin stopped");
    Ok(())
}

/// Resolve on ctrl-c or, on unix, SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received ctrl-c, shutting down");
    }
    Ok(())
}
