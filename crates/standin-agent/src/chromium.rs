//! Headless Chromium agent driven over the DevTools protocol.
//!
//! Launch sequence: spawn the browser with a throwaway profile, discover the
//! debugging endpoints, install the identity tagging on the first page,
//! navigate, and wait for network quiescence. The whole sequence is bounded
//! by `LaunchConfig::launch_timeout`; on any failure the child is killed and
//! reaped before the error is returned.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use standin_core::identity::{IDENTITY_ENV, SELF_ORIGIN_HEADER, SELF_ORIGIN_HEADER_VALUE};

use crate::agent::Agent;
use crate::cdp::CdpClient;
use crate::error::AgentError;
use crate::idle::{DEFAULT_MAX_INFLIGHT, DEFAULT_QUIET, NetworkIdleTracker};
use crate::launch::{LaunchConfig, pick_debug_port};
use crate::script::identity_script;

const DISCOVERY_POLL: Duration = Duration::from_millis(100);

// ─── Endpoint discovery ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    ws_url: Option<String>,
}

/// First attachable page target from `/json/list`.
fn pick_page_target(targets: &[TargetInfo]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.kind == "page")
        .find_map(|t| t.ws_url.clone())
}

// ─── Session ─────────────────────────────────────────────────────

/// A running agent browser. Dropping it kills the process and removes the
/// profile directory.
pub struct ChromiumSession {
    child: Child,
    page: CdpClient,
    browser_ws: String,
    pid: Option<u32>,
    debug_port: u16,
    _profile: TempDir,
}

impl std::fmt::Debug for ChromiumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumSession")
            .field("pid", &self.pid)
            .field("debug_port", &self.debug_port)
            .field("page", &self.page.url())
            .finish_non_exhaustive()
    }
}

// ─── Agent ───────────────────────────────────────────────────────

pub struct ChromiumAgent {
    config: LaunchConfig,
    http: reqwest::Client,
}

impl ChromiumAgent {
    pub fn new(config: LaunchConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    fn spawn_browser(&self, debug_port: u16, profile: &TempDir) -> Result<Child, AgentError> {
        let args = self.config.build_args(debug_port, profile.path());
        let mut failures = Vec::new();
        for candidate in self.config.binary_candidates() {
            let spawned = Command::new(&candidate)
                .args(&args)
                .env(IDENTITY_ENV, "1")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(child) => {
                    tracing::debug!(binary = %candidate.display(), pid = ?child.id(), "browser spawned");
                    return Ok(child);
                }
                Err(e) => failures.push(format!("{}: {e}", candidate.display())),
            }
        }
        Err(AgentError::BrowserNotFound(failures.join("; ")))
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        debug_port: u16,
        path: &str,
    ) -> Option<T> {
        let url = format!("http://127.0.0.1:{debug_port}{path}");
        let resp = self.http.get(&url).send().await.ok()?;
        resp.json::<T>().await.ok()
    }

    /// Poll the debugging endpoint until both the browser and a page target
    /// are reachable. Fails early if the browser dies.
    async fn discover(
        &self,
        child: &mut Child,
        debug_port: u16,
    ) -> Result<(String, String), AgentError> {
        let mut browser_ws: Option<String> = None;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(AgentError::BrowserExited(status.to_string()));
            }
            if browser_ws.is_none() {
                browser_ws = self
                    .fetch_json::<VersionInfo>(debug_port, "/json/version")
                    .await
                    .map(|v| v.ws_url);
            }
            if let Some(browser) = &browser_ws {
                let targets = self
                    .fetch_json::<Vec<TargetInfo>>(debug_port, "/json/list")
                    .await
                    .unwrap_or_default();
                if let Some(page) = pick_page_target(&targets) {
                    return Ok((browser.clone(), page));
                }
            }
            tokio::time::sleep(DISCOVERY_POLL).await;
        }
    }

    async fn attach_and_navigate(
        &self,
        child: &mut Child,
        debug_port: u16,
        target_url: &str,
    ) -> Result<(String, CdpClient), AgentError> {
        let (browser_ws, page_ws) = self.discover(child, debug_port).await?;
        let mut page = CdpClient::connect(&page_ws).await?;

        install_identity(&page).await?;

        let nav = page.send("Page.navigate", json!({ "url": target_url })).await?;
        if let Some(reason) = nav.get("errorText").and_then(Value::as_str) {
            return Err(AgentError::NavigationFailed {
                url: target_url.to_string(),
                reason: reason.to_string(),
            });
        }

        wait_for_network_idle(&mut page).await?;
        Ok((browser_ws, page))
    }
}

#[async_trait]
impl Agent for ChromiumAgent {
    type Session = ChromiumSession;

    async fn launch(&self, target_url: &str) -> Result<ChromiumSession, AgentError> {
        let profile = tempfile::Builder::new()
            .prefix("standin-agent-")
            .tempdir()?;
        let debug_port = pick_debug_port()?;
        let mut child = self.spawn_browser(debug_port, &profile)?;
        let pid = child.id();

        let attached = tokio::time::timeout(
            self.config.launch_timeout,
            self.attach_and_navigate(&mut child, debug_port, target_url),
        )
        .await
        .unwrap_or(Err(AgentError::LaunchTimeout(self.config.launch_timeout)));

        match attached {
            Ok((browser_ws, page)) => {
                tracing::info!(pid = ?pid, url = target_url, "agent browser ready");
                Ok(ChromiumSession {
                    child,
                    page,
                    browser_ws,
                    pid,
                    debug_port,
                    _profile: profile,
                })
            }
            Err(e) => {
                reap(&mut child, pid).await;
                Err(e)
            }
        }
    }

    async fn close(&self, session: ChromiumSession) -> Result<(), AgentError> {
        let ChromiumSession {
            mut child,
            page,
            browser_ws,
            pid,
            _profile: profile,
            ..
        } = session;
        drop(page);

        let timeout = self.config.teardown_timeout;
        let graceful = match tokio::time::timeout(timeout, CdpClient::connect(&browser_ws)).await {
            Ok(Ok(browser)) => browser
                .send_with_timeout("Browser.close", json!({}), timeout)
                .await
                .map(|_| ()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AgentError::CommandTimeout {
                method: "connect".to_string(),
                duration: timeout,
            }),
        };
        if let Err(e) = &graceful {
            // The browser often drops the socket before replying to Browser.close.
            tracing::debug!(pid = ?pid, error = %e, "graceful close incomplete");
        }

        let result = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid = ?pid, %status, "agent browser exited");
                Ok(())
            }
            _ => child.kill().await.map_err(|e| {
                AgentError::TeardownFailed(format!("kill pid {pid:?}: {e}"))
            }),
        };
        drop(profile);
        result
    }
}

// ─── Launch helpers ──────────────────────────────────────────────

/// Tag all traffic and define the identity flag before any page script.
async fn install_identity(page: &CdpClient) -> Result<(), AgentError> {
    page.send("Page.enable", json!({})).await?;
    page.send("Network.enable", json!({})).await?;

    let mut headers = serde_json::Map::new();
    headers.insert(
        SELF_ORIGIN_HEADER.to_string(),
        Value::from(SELF_ORIGIN_HEADER_VALUE),
    );
    page.send(
        "Network.setExtraHTTPHeaders",
        json!({ "headers": Value::Object(headers) }),
    )
    .await?;

    page.send(
        "Page.addScriptToEvaluateOnNewDocument",
        json!({ "source": identity_script() }),
    )
    .await?;
    Ok(())
}

async fn wait_for_network_idle(page: &mut CdpClient) -> Result<(), AgentError> {
    let mut tracker = NetworkIdleTracker::new(DEFAULT_MAX_INFLIGHT, DEFAULT_QUIET, Instant::now());
    loop {
        if tracker.is_idle(Instant::now()) {
            return Ok(());
        }
        let event = match tracker.idle_at() {
            Some(at) => tokio::select! {
                biased;
                event = page.next_event() => Some(event),
                () = tokio::time::sleep_until(at) => None,
            },
            None => Some(page.next_event().await),
        };
        match event {
            Some(Some(ev)) => tracker.on_event(&ev.method, &ev.params, Instant::now()),
            Some(None) => {
                return Err(AgentError::Protocol(
                    "page connection closed while waiting for network idle".to_string(),
                ));
            }
            None => {}
        }
    }
}

/// Kill and reap a browser that failed to launch.
async fn reap(child: &mut Child, pid: Option<u32>) {
    if let Err(e) = child.kill().await {
        tracing::warn!(pid = ?pid, error = %e, "failed to reap agent browser after launch failure");
    }
}
