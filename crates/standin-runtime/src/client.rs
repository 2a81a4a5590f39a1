//! HTTP client side of the CLI: `status` and `beacon`.

use std::time::Duration;

use tokio::sync::watch;

use standin_core::identity::IDENTITY_ENV;

use crate::beacon::{Beacon, BeaconExit};
use crate::cli::{BeaconOpts, StatusOpts};
use crate::config::normalize_mount;
use crate::controller::StatusSnapshot;
use crate::daemon::wait_for_signal;

/// `{base}{mount}/{path}` with the mount normalized.
pub(crate) fn endpoint(base: &str, mount: &str, path: &str) -> anyhow::Result<String> {
    let mount = normalize_mount(mount)?;
    Ok(format!("{}{mount}/{path}", base.trim_end_matches('/')))
}

/// `standin status`: print the running instance's status.
pub async fn cmd_status(opts: &StatusOpts) -> anyhow::Result<()> {
    let url = endpoint(&opts.url, &opts.mount, "status")?;
    let resp = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach standin at {url}: {e}"))?
        .error_for_status()?;

    if opts.short {
        let snapshot: StatusSnapshot = resp.json().await?;
        println!("{}", format_short(&snapshot));
    } else {
        let body: serde_json::Value = resp.json().await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(())
}

/// One line: `STATE client=alive agent=running`.
pub(crate) fn format_short(s: &StatusSnapshot) -> String {
    let mut line = format!(
        "{} client={} agent={}",
        s.state,
        if s.real_client_alive { "alive" } else { "absent" },
        if s.agent_running { "running" } else { "none" },
    );
    if let Some(target) = s.pending_target {
        line.push_str(&format!(" pending={target}"));
    }
    line
}

/// `standin beacon`: heartbeat as a native client until ctrl-c.
pub async fn cmd_beacon(opts: &BeaconOpts) -> anyhow::Result<()> {
    if opts.interval_ms == 0 {
        anyhow::bail!("interval-ms must be greater than zero");
    }
    let url = endpoint(&opts.url, &opts.mount, "heartbeat")?;
    let beacon = Beacon::new(url, Duration::from_millis(opts.interval_ms));
    let identity = std::env::var(IDENTITY_ENV).ok();

    let (stop_tx, stop_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::error!(error = %e, "signal handler failed");
        }
        let _ = stop_tx.send(true);
    });

    let exit = beacon.run(identity.as_deref(), stop_rx).await;
    signal.abort();
    match exit {
        BeaconExit::Stopped | BeaconExit::Suppressed => Ok(()),
        BeaconExit::AlreadyRunning => anyhow::bail!("a beacon is already running"),
    }
}
