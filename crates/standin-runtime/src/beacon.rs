//! Heartbeat emitters for real clients.
//!
//! The browser beacon is a script served by the server and loaded by client
//! pages. [`Beacon`] is the native equivalent used by `standin beacon`. Both
//! exit before emitting anything when they find the agent identity flag, and
//! both keep at most one emitter per page or process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use standin_core::identity::{IDENTITY_FLAG, is_identity_flag_set};

use crate::server::HeartbeatResponse;

const SCRIPT_TEMPLATE: &str = include_str!("../assets/beacon.js");

/// Render the browser beacon for a heartbeat endpoint and period.
pub fn render_script(heartbeat_url: &str, interval_ms: u64) -> String {
    let endpoint = serde_json::to_string(heartbeat_url).unwrap_or_else(|_| "\"\"".to_string());
    SCRIPT_TEMPLATE
        .replace("__IDENTITY_FLAG__", IDENTITY_FLAG)
        .replace("'__HEARTBEAT_URL__'", &endpoint)
        .replace("__INTERVAL_MS__", &interval_ms.to_string())
}

// ─── Native emitter ──────────────────────────────────────────────

static PROCESS_BEACON: AtomicBool = AtomicBool::new(false);

/// Ownership of the process-wide emitter slot; released on drop.
pub struct BeaconSlot(&'static AtomicBool);

impl BeaconSlot {
    fn acquire_in(flag: &'static AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BeaconSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconExit {
    /// Running inside the agent; nothing was emitted.
    Suppressed,
    /// Another emitter holds the slot.
    AlreadyRunning,
    /// Shutdown was requested.
    Stopped,
}

pub struct Beacon {
    http: reqwest::Client,
    url: String,
    interval: Duration,
}

impl Beacon {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.into(),
            interval,
        }
    }

    /// Send one heartbeat.
    pub async fn beat(&self) -> Result<HeartbeatResponse, reqwest::Error> {
        self.http
            .post(&self.url)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Emit until `shutdown` flips to `true`. `identity` is the value of the
    /// agent identity variable in this process's environment.
    pub async fn run(&self, identity: Option<&str>, shutdown: watch::Receiver<bool>) -> BeaconExit {
        self.run_in(&PROCESS_BEACON, identity, shutdown).await
    }

    async fn run_in(
        &self,
        slot: &'static AtomicBool,
        identity: Option<&str>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BeaconExit {
        if is_identity_flag_set(identity) {
            tracing::info!("running inside the stand-in agent; beacon suppressed");
            return BeaconExit::Suppressed;
        }
        let Some(_slot) = BeaconSlot::acquire_in(slot) else {
            tracing::warn!("a beacon is already running in this process");
            return BeaconExit::AlreadyRunning;
        };

        tracing::info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "beacon started");
        let mut ticker = tokio::time::interval(self.interval);
        let mut reclaiming = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.beat().await {
                    Ok(reply) => {
                        if reply.ghosting && !reclaiming {
                            tracing::info!("stand-in active; reclaiming session");
                        }
                        reclaiming = reply.ghosting;
                    }
                    Err(e) => tracing::debug!(error = %e, "heartbeat failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("beacon stopped");
        BeaconExit::Stopped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use standin_core::{HeartbeatTracker, SpawnRateLimiter, TransitionMachine};

    use super::*;
    use crate::clock::Clock;
    use crate::controller::TransitionController;
    use crate::server::{AppState, router, serve};
    use crate::supervisor::AgentSupervisor;
    use crate::test_support::FakeAgent;

    #[test]
    fn script_substitutes_placeholders() {
        let script = render_script("/api/plugins/standin/heartbeat", 1500);
        for placeholder in ["__IDENTITY_FLAG__", "__HEARTBEAT_URL__", "__INTERVAL_MS__"] {
            assert!(!script.contains(placeholder), "{placeholder} left in script");
        }
        assert!(script.contains("const endpoint = \"/api/plugins/standin/heartbeat\";"));
        assert!(script.contains("const periodMs = 1500;"));
        assert!(script.contains(&format!("window.{IDENTITY_FLAG} === true")));
    }

    #[test]
    fn script_exits_before_emitting_for_agent() {
        let script = render_script("/heartbeat", 2000);
        let flag_check = script.find(IDENTITY_FLAG).expect("flag check");
        let first_fetch = script.find("fetch(").expect("fetch");
        assert!(flag_check < first_fetch);
        let guard = script.find("if (window.__standinBeacon) return;").expect("guard");
        assert!(guard < flag_check);
    }

    #[test]
    fn endpoint_is_escaped_as_a_string_literal() {
        let script = render_script("/a'b/heartbeat", 2000);
        assert!(script.contains("const endpoint = \"/a'b/heartbeat\";"));
    }

    #[test]
    fn slot_is_exclusive_until_dropped() {
        static SLOT: AtomicBool = AtomicBool::new(false);
        let first = BeaconSlot::acquire_in(&SLOT).expect("free");
        assert!(BeaconSlot::acquire_in(&SLOT).is_none());
        drop(first);
        assert!(BeaconSlot::acquire_in(&SLOT).is_some());
    }

    #[tokio::test]
    async fn agent_environment_suppresses_beacon() {
        static SLOT: AtomicBool = AtomicBool::new(false);
        let (_tx, rx) = watch::channel(false);
        let beacon = Beacon::new("http://127.0.0.1:9/heartbeat", Duration::from_millis(10));
        assert_eq!(beacon.run_in(&SLOT, Some("1"), rx).await, BeaconExit::Suppressed);
        assert!(!SLOT.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn second_beacon_in_process_does_not_start() {
        static SLOT: AtomicBool = AtomicBool::new(false);
        let _held = BeaconSlot::acquire_in(&SLOT).expect("free");
        let (_tx, rx) = watch::channel(false);
        let beacon = Beacon::new("http://127.0.0.1:9/heartbeat", Duration::from_millis(10));
        assert_eq!(beacon.run_in(&SLOT, None, rx).await, BeaconExit::AlreadyRunning);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn beacon_keeps_client_alive_against_live_server() {
        static SLOT: AtomicBool = AtomicBool::new(false);

        let agent = Arc::new(FakeAgent::default());
        let clock = Clock::new();
        let supervisor = Arc::new(AgentSupervisor::new(
            Arc::clone(&agent),
            "http://localhost/",
            SpawnRateLimiter::new(3),
            clock,
        ));
        let controller = Arc::new(TransitionController::new(
            TransitionMachine::new(3_000),
            HeartbeatTracker::new(10_000),
            supervisor,
            clock,
            Duration::from_secs(2),
        ));
        let app = router(AppState::new(Arc::clone(&controller), "", 2_000), "");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, app, stop_rx.clone()));

        let beacon = Beacon::new(format!("http://{addr}/heartbeat"), Duration::from_millis(50));
        let stopper = {
            let stop_tx = stop_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(400)).await;
                let _ = stop_tx.send(true);
            })
        };
        assert_eq!(beacon.run_in(&SLOT, None, stop_rx).await, BeaconExit::Stopped);
        stopper.await.expect("stopper");
        server.await.expect("join").expect("serve");

        let status = controller.status();
        assert!(status.real_client_alive);
        assert!(status.accepted_signals >= 2, "{status:?}");
        assert_eq!(status.suppressed_signals, 0);
    }
}
