//! Transition controller: owns the liveness state and drives the agent.
//!
//! The periodic loop evaluates liveness and arms debounced transitions on
//! the core [`TransitionMachine`]. Each armed transition gets one timer
//! task; when it fires, the controller re-validates liveness, performs the
//! side effect through the [`AgentSupervisor`], and commits with the
//! transition's token. Superseded tokens turn every step into a no-op.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use standin_agent::Agent;
use standin_core::{
    FireAction, HeartbeatTracker, LivenessState, PendingTransition, RequestOutcome,
    SignalOrigin, TransitionMachine, TransitionToken,
};

use crate::clock::Clock;
use crate::supervisor::{AgentSupervisor, KillOutcome, SpawnOutcome};
use crate::sync::lock;

/// Point-in-time view served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: LivenessState,
    pub real_client_alive: bool,
    #[serde(default)]
    pub pending_target: Option<LivenessState>,
    #[serde(default)]
    pub agent_running: bool,
    #[serde(default)]
    pub spawn_in_flight: bool,
    #[serde(default)]
    pub last_seen_ms_ago: Option<u64>,
    #[serde(default)]
    pub last_signal_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub spawn_capacity: u32,
    #[serde(default)]
    pub accepted_signals: u64,
    #[serde(default)]
    pub suppressed_signals: u64,
}

struct Presence {
    tracker: HeartbeatTracker,
    last_signal_at: Option<DateTime<Utc>>,
}

pub struct TransitionController<A: Agent> {
    machine: Mutex<TransitionMachine>,
    presence: Mutex<Presence>,
    supervisor: Arc<AgentSupervisor<A>>,
    clock: Clock,
    check_interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<A: Agent> TransitionController<A> {
    pub fn new(
        machine: TransitionMachine,
        tracker: HeartbeatTracker,
        supervisor: Arc<AgentSupervisor<A>>,
        clock: Clock,
        check_interval: Duration,
    ) -> Self {
        Self {
            machine: Mutex::new(machine),
            presence: Mutex::new(Presence {
                tracker,
                last_signal_at: None,
            }),
            supervisor,
            clock,
            check_interval,
            timer: Mutex::new(None),
        }
    }

    // ─── Presence ────────────────────────────────────────────────────

    /// Record a heartbeat. Returns `true` when it counted as genuine.
    pub fn record_signal(&self, origin: SignalOrigin) -> bool {
        let now = self.clock.now_ms();
        let mut presence = lock(&self.presence);
        let accepted = presence.tracker.record_signal(origin, now);
        if accepted {
            presence.last_signal_at = Some(Utc::now());
        } else {
            tracing::trace!("self-originated heartbeat suppressed");
        }
        accepted
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.presence).tracker.is_alive(self.clock.now_ms())
    }

    pub fn state(&self) -> LivenessState {
        lock(&self.machine).state()
    }

    pub fn is_ghosting(&self) -> bool {
        self.state() == LivenessState::GhostActive
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<PendingTransition> {
        lock(&self.machine).pending()
    }

    pub fn status(&self) -> StatusSnapshot {
        let now = self.clock.now_ms();
        let (real_client_alive, last_seen_ms_ago, last_signal_at, accepted, suppressed) = {
            let p = lock(&self.presence);
            (
                p.tracker.is_alive(now),
                p.tracker.since_last_seen(now),
                p.last_signal_at,
                p.tracker.accepted_signals(),
                p.tracker.suppressed_signals(),
            )
        };
        let (state, pending) = {
            let m = lock(&self.machine);
            (m.state(), m.pending())
        };
        StatusSnapshot {
            state,
            real_client_alive,
            pending_target: pending.map(|p| p.target),
            agent_running: self.supervisor.has_agent(),
            spawn_in_flight: self.supervisor.is_spawning(),
            last_seen_ms_ago,
            last_signal_at,
            spawn_capacity: self.supervisor.spawn_capacity(),
            accepted_signals: accepted,
            suppressed_signals: suppressed,
        }
    }

    // ─── Control loop ────────────────────────────────────────────────

    /// One evaluation of the decision table against current liveness.
    pub fn tick(self: &Arc<Self>) {
        let alive = self.is_alive();
        let now = self.clock.now_ms();
        let outcome = lock(&self.machine).tick(alive, now);
        if let Some(outcome) = outcome {
            self.on_request(outcome);
        }
    }

    /// Arm a debounced transition toward `target`.
    pub fn request_transition(self: &Arc<Self>, target: LivenessState) -> RequestOutcome {
        let now = self.clock.now_ms();
        let outcome = lock(&self.machine).request(target, now);
        self.on_request(outcome);
        outcome
    }

    fn on_request(self: &Arc<Self>, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Coalesced { pending } => {
                tracing::trace!(to = %pending.target, "transition already armed");
            }
            RequestOutcome::Armed {
                pending,
                superseded,
            } => {
                tracing::info!(
                    to = %pending.target,
                    token = pending.token.generation(),
                    superseded = ?superseded.map(TransitionToken::generation),
                    fire_at_ms = pending.fire_at_ms,
                    "transition armed"
                );
                self.arm_timer(pending);
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, pending: PendingTransition) {
        let this = Arc::clone(self);
        let deadline = self.clock.instant_at(pending.fire_at_ms);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Aborting this timer must never cancel a fire already started.
            tokio::spawn(this.fire(pending.token));
        });
        let previous = lock(&self.timer).replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Body of a fired timer.
    pub async fn fire(self: Arc<Self>, token: TransitionToken) {
        let alive = self.is_alive();
        let agent_present = self.supervisor.has_agent();
        let action = lock(&self.machine).begin_fire(token, alive, agent_present);

        let settled = match action {
            FireAction::Stale => {
                tracing::debug!(token = token.generation(), "stale transition ignored");
                return;
            }
            FireAction::Spawn => match self.supervisor.spawn().await {
                Ok(SpawnOutcome::Spawned | SpawnOutcome::AlreadyRunning) => {
                    LivenessState::GhostActive
                }
                Ok(SpawnOutcome::RateLimited { retry_at_ms }) => {
                    tracing::debug!(?retry_at_ms, "spawn deferred; settling NO_CLIENT");
                    LivenessState::NoClient
                }
                Ok(SpawnOutcome::InFlight) => LivenessState::NoClient,
                Ok(SpawnOutcome::Retracted) => {
                    tracing::debug!("spawn retracted before it landed");
                    LivenessState::NoClient
                }
                Err(e) => {
                    tracing::error!(error = %e, "agent spawn failed");
                    LivenessState::NoClient
                }
            },
            FireAction::Kill { commit } => {
                // Teardown failures are already logged by the supervisor.
                self.supervisor.kill().await;
                commit
            }
            FireAction::Settle(state) => state,
        };

        let committed = lock(&self.machine).commit(token, settled);
        if committed {
            tracing::info!(state = %settled, token = token.generation(), "transition committed");
        } else {
            tracing::debug!(
                token = token.generation(),
                "transition superseded while in flight"
            );
        }
    }

    /// Periodic evaluation until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.check_interval;
        let mut ticker = tokio::time::interval_at(start, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_ms = self.check_interval.as_millis() as u64,
            "control loop started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("control loop stopped");
    }

    /// Cancel the armed transition and retract the agent within `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Option<KillOutcome> {
        let cancelled = lock(&self.machine).cancel();
        if let Some(p) = cancelled {
            tracing::info!(to = %p.target, "pending transition cancelled");
        }
        let timer = lock(&self.timer).take();
        if let Some(timer) = timer {
            timer.abort();
        }
        self.supervisor.shutdown(deadline).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use standin_core::SpawnRateLimiter;

    use super::*;
    use crate::test_support::FakeAgent;

    use LivenessState::*;

    type Ctl = TransitionController<Arc<FakeAgent>>;

    fn controller(agent: &Arc<FakeAgent>, max_spawns: u32) -> (Arc<Ctl>, Clock) {
        let clock = Clock::new();
        let supervisor = Arc::new(AgentSupervisor::new(
            Arc::clone(agent),
            "http://localhost:8000/",
            SpawnRateLimiter::new(max_spawns),
            clock,
        ));
        let ctl = Arc::new(TransitionController::new(
            TransitionMachine::new(3_000),
            HeartbeatTracker::new(10_000),
            supervisor,
            clock,
            Duration::from_millis(2_000),
        ));
        (ctl, clock)
    }

    /// Sleep to `ms` on the controller timeline and let spawned tasks settle.
    async fn advance_to(clock: Clock, ms: u64) {
        tokio::time::sleep_until(clock.instant_at(ms)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn start_loop(ctl: &Arc<Ctl>) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(Arc::clone(ctl).run(rx));
        tx
    }

    #[tokio::test(start_paused = true)]
    async fn absent_client_is_replaced_after_debounce() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);
        let _stop = start_loop(&ctl);

        advance_to(clock, 2_001).await;
        assert_eq!(ctl.state(), Transitioning);
        assert_eq!(ctl.pending().map(|p| p.target), Some(GhostActive));
        assert_eq!(agent.launches(), 0);

        advance_to(clock, 4_999).await;
        assert_eq!(agent.launches(), 0);

        advance_to(clock, 5_001).await;
        assert_eq!(ctl.state(), GhostActive);
        assert_eq!(agent.launches(), 1);
        assert!(ctl.is_ghosting());

        // Further ticks leave a settled ghost alone.
        advance_to(clock, 12_001).await;
        assert_eq!(ctl.state(), GhostActive);
        assert_eq!(agent.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_client_retracts_agent() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);
        let _stop = start_loop(&ctl);
        advance_to(clock, 5_001).await;
        assert_eq!(ctl.state(), GhostActive);

        advance_to(clock, 5_100).await;
        assert!(ctl.record_signal(SignalOrigin::Genuine));

        // Tick at 6000 arms Real for 9000.
        advance_to(clock, 6_001).await;
        assert_eq!(ctl.state(), Transitioning);
        assert_eq!(ctl.pending().map(|p| p.target), Some(RealActive));

        advance_to(clock, 7_000).await;
        ctl.record_signal(SignalOrigin::Genuine);
        advance_to(clock, 8_500).await;
        assert_eq!(ctl.state(), Transitioning);
        assert_eq!(agent.live(), 1);

        advance_to(clock, 9_001).await;
        assert_eq!(ctl.state(), RealActive);
        assert_eq!(agent.closes(), 1);
        assert!(!ctl.status().agent_running);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_heartbeats_do_not_count_as_presence() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);
        let _stop = start_loop(&ctl);
        advance_to(clock, 5_001).await;

        for ms in (5_500..20_000).step_by(1_000) {
            advance_to(clock, ms).await;
            assert!(!ctl.record_signal(SignalOrigin::SelfOrigin));
        }
        assert_eq!(ctl.state(), GhostActive);
        assert_eq!(agent.closes(), 0);
        let status = ctl.status();
        assert_eq!(status.suppressed_signals, 15);
        assert_eq!(status.accepted_signals, 0);
        assert!(status.last_signal_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_request_arms_once_and_commits_once() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);

        let first = ctl.request_transition(GhostActive);
        advance_to(clock, 1_000).await;
        let second = ctl.request_transition(GhostActive);
        assert!(first.is_armed());
        assert!(!second.is_armed());
        assert_eq!(first.pending().token, second.pending().token);

        advance_to(clock, 3_001).await;
        assert_eq!(ctl.state(), GhostActive);
        assert_eq!(agent.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_transition_performs_no_side_effect() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);

        let ghost = ctl.request_transition(GhostActive);
        advance_to(clock, 1_000).await;
        let real = ctl.request_transition(RealActive);
        assert_eq!(
            real,
            RequestOutcome::Armed {
                pending: real.pending(),
                superseded: Some(ghost.pending().token),
            }
        );

        // The ghost deadline passes without a launch.
        advance_to(clock, 3_500).await;
        assert_eq!(agent.launches(), 0);
        assert_eq!(ctl.state(), Transitioning);

        // Real fires with no client and no agent: falls back to NoClient.
        advance_to(clock, 4_001).await;
        assert_eq!(ctl.state(), NoClient);
        assert_eq!(agent.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_client_during_launch_never_keeps_agent() {
        let agent = Arc::new(FakeAgent::with_launch_delay(Duration::from_secs(5)));
        let (ctl, clock) = controller(&agent, 3);
        let _stop = start_loop(&ctl);

        // Ghost fires at 5000; the launch runs until 10000.
        advance_to(clock, 6_000).await;
        assert!(ctl.status().spawn_in_flight);
        ctl.record_signal(SignalOrigin::Genuine);
        assert!(ctl.request_transition(RealActive).is_armed());

        for ms in (7_000..=30_000).step_by(1_000) {
            advance_to(clock, ms).await;
            ctl.record_signal(SignalOrigin::Genuine);
        }
        assert_eq!(ctl.state(), RealActive);
        let status = ctl.status();
        assert!(!status.agent_running);
        assert!(!status.spawn_in_flight);
        assert_eq!(agent.launches(), 1);
        assert_eq!(agent.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fire_is_a_no_op() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, _clock) = controller(&agent, 3);

        let old = ctl.request_transition(GhostActive).pending().token;
        let new = ctl.request_transition(RealActive).pending();
        Arc::clone(&ctl).fire(old).await;
        assert_eq!(ctl.state(), Transitioning);
        assert_eq!(ctl.pending(), Some(new));
        assert_eq!(agent.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ghost_fire_revalidates_against_returning_client() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);

        ctl.request_transition(GhostActive);
        advance_to(clock, 2_000).await;
        ctl.record_signal(SignalOrigin::Genuine);

        advance_to(clock, 3_001).await;
        assert_eq!(ctl.state(), RealActive);
        assert_eq!(agent.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_spawn_falls_back_and_retries() {
        let agent = Arc::new(FakeAgent::default());
        agent.fail_launch.store(true, Ordering::SeqCst);
        let (ctl, clock) = controller(&agent, 3);
        let _stop = start_loop(&ctl);

        advance_to(clock, 5_001).await;
        assert_eq!(ctl.state(), NoClient);
        assert!(!ctl.status().agent_running);

        agent.fail_launch.store(false, Ordering::SeqCst);
        // Tick at 6000 re-arms; fires at 9000.
        advance_to(clock, 9_001).await;
        assert_eq!(ctl.state(), GhostActive);
        assert_eq!(agent.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_spawn_settles_no_client() {
        let agent = Arc::new(FakeAgent::default());
        agent.fail_launch.store(true, Ordering::SeqCst);
        let (ctl, clock) = controller(&agent, 1);
        let _stop = start_loop(&ctl);

        // First attempt (fire at 5000) burns the only slot.
        advance_to(clock, 5_001).await;
        agent.fail_launch.store(false, Ordering::SeqCst);
        assert_eq!(ctl.status().spawn_capacity, 0);

        // Second attempt (fire at 9000) is refused by the limiter.
        advance_to(clock, 9_001).await;
        assert_eq!(ctl.state(), NoClient);
        assert_eq!(agent.launches(), 0);

        // Budget returns after the window; the loop keeps trying.
        advance_to(clock, 70_000).await;
        assert_eq!(ctl.state(), GhostActive);
        assert_eq!(agent.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_and_retracts_agent() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);
        let stop = start_loop(&ctl);
        advance_to(clock, 5_001).await;
        assert_eq!(agent.live(), 1);

        ctl.record_signal(SignalOrigin::Genuine);
        advance_to(clock, 6_001).await;
        assert_eq!(ctl.state(), Transitioning);

        stop.send(true).expect("loop running");
        let outcome = ctl.shutdown(Duration::from_secs(5)).await;
        assert_eq!(outcome, Some(KillOutcome::Released));
        assert_eq!(ctl.pending(), None);
        assert_eq!(ctl.state(), NoClient);
        assert_eq!(agent.live(), 0);

        // The cancelled timer never fires.
        advance_to(clock, 20_000).await;
        assert_eq!(agent.launches(), 1);
        assert_eq!(agent.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_launch_leaves_no_agent() {
        let agent = Arc::new(FakeAgent::with_launch_delay(Duration::from_secs(5)));
        let (ctl, clock) = controller(&agent, 3);
        let stop = start_loop(&ctl);

        advance_to(clock, 6_000).await;
        assert!(ctl.status().spawn_in_flight);

        stop.send(true).expect("loop running");
        let outcome = ctl.shutdown(Duration::from_secs(5)).await;
        assert_eq!(outcome, Some(KillOutcome::NoAgent));
        assert!(!ctl.status().agent_running);
        assert_eq!(agent.live(), 0);

        advance_to(clock, 20_000).await;
        assert_eq!(agent.launches(), 1);
        assert_eq!(agent.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_presence() {
        let agent = Arc::new(FakeAgent::default());
        let (ctl, clock) = controller(&agent, 3);

        let before = ctl.status();
        assert_eq!(before.state, NoClient);
        assert!(!before.real_client_alive);
        assert_eq!(before.last_seen_ms_ago, None);
        assert_eq!(before.spawn_capacity, 3);

        ctl.record_signal(SignalOrigin::Genuine);
        advance_to(clock, 1_500).await;
        let after = ctl.status();
        assert!(after.real_client_alive);
        assert_eq!(after.last_seen_ms_ago, Some(1_500));
        assert!(after.last_signal_at.is_some());
        assert_eq!(after.accepted_signals, 1);
    }
}
