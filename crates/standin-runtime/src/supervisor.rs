//! Agent lifecycle: at most one live stand-in, rate-limited launches.
//!
//! Spawn and kill are each guarded by an in-flight flag that is set before
//! the first await and cleared on every exit path. A kill swaps the handle
//! out before it starts closing, so nothing else can observe a half-closed
//! agent. A kill that lands while a launch is still running bumps the
//! retract epoch; the launch then closes what it started instead of
//! storing it.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use standin_agent::{Agent, AgentError};
use standin_core::SpawnRateLimiter;

use crate::clock::Clock;
use crate::sync::lock;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("agent launch failed: {0}")]
    LaunchFailed(#[source] AgentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned,
    /// A live agent already exists; nothing was launched.
    AlreadyRunning,
    /// Another spawn is in progress.
    InFlight,
    /// The launch budget is exhausted until `retry_at_ms`.
    RateLimited { retry_at_ms: Option<u64> },
    /// A retract arrived before the agent could be stored. Anything launched
    /// has been closed again.
    Retracted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Released,
    /// The handle was cleared but the process could not be reaped.
    ReleaseFailed,
    NoAgent,
    InFlight,
}

/// RAII holder of an in-flight flag.
struct InFlight<'a>(&'a watch::Sender<bool>);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a watch::Sender<bool>) -> Option<Self> {
        let acquired = flag.send_if_modified(|busy| !std::mem::replace(busy, true));
        acquired.then(|| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

async fn wait_idle(flag: &watch::Sender<bool>) {
    let mut rx = flag.subscribe();
    let _ = rx.wait_for(|busy| !*busy).await;
}

/// The stored handle plus what a running launch must check before storing.
struct Slot<S> {
    session: Option<S>,
    /// Bumped by every kill.
    retracts: u64,
    /// Set once by shutdown; no launch is stored afterwards.
    closed: bool,
}

pub struct AgentSupervisor<A: Agent> {
    agent: A,
    target_url: String,
    clock: Clock,
    limiter: Mutex<SpawnRateLimiter>,
    slot: Mutex<Slot<A::Session>>,
    spawning: watch::Sender<bool>,
    killing: watch::Sender<bool>,
}

impl<A: Agent> AgentSupervisor<A> {
    pub fn new(agent: A, target_url: impl Into<String>, limiter: SpawnRateLimiter, clock: Clock) -> Self {
        Self {
            agent,
            target_url: target_url.into(),
            clock,
            limiter: Mutex::new(limiter),
            slot: Mutex::new(Slot {
                session: None,
                retracts: 0,
                closed: false,
            }),
            spawning: watch::Sender::new(false),
            killing: watch::Sender::new(false),
        }
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn has_agent(&self) -> bool {
        lock(&self.slot).session.is_some()
    }

    pub fn is_spawning(&self) -> bool {
        *self.spawning.borrow()
    }

    /// Launch attempts left in the current window.
    pub fn spawn_capacity(&self) -> u32 {
        lock(&self.limiter).remaining(self.clock.now_ms())
    }

    /// Start the agent unless one is live, a spawn is in flight, or the
    /// launch budget is spent. Only an admitted launch consumes budget.
    pub async fn spawn(&self) -> Result<SpawnOutcome, SupervisorError> {
        if self.has_agent() {
            return Ok(SpawnOutcome::AlreadyRunning);
        }
        let Some(_guard) = InFlight::acquire(&self.spawning) else {
            tracing::debug!("spawn already in flight");
            return Ok(SpawnOutcome::InFlight);
        };
        // A kill may have completed or a spawn finished between the check
        // above and taking the guard.
        let epoch = {
            let slot = lock(&self.slot);
            if slot.session.is_some() {
                return Ok(SpawnOutcome::AlreadyRunning);
            }
            if slot.closed {
                return Ok(SpawnOutcome::Retracted);
            }
            slot.retracts
        };

        let now = self.clock.now_ms();
        {
            let mut limiter = lock(&self.limiter);
            if !limiter.can_spawn(now) {
                let retry_at_ms = limiter.next_slot_at(now);
                tracing::info!(
                    max_per_window = limiter.max_attempts(),
                    retry_at_ms = ?retry_at_ms,
                    "agent spawn rate-limited"
                );
                return Ok(SpawnOutcome::RateLimited { retry_at_ms });
            }
        }

        tracing::info!(url = %self.target_url, "spawning agent");
        let session = self
            .agent
            .launch(&self.target_url)
            .await
            .map_err(SupervisorError::LaunchFailed)?;

        let stored = {
            let mut slot = lock(&self.slot);
            if slot.closed || slot.retracts != epoch {
                Err(session)
            } else {
                Ok(slot.session.replace(session))
            }
        };
        match stored {
            Ok(None) => Ok(SpawnOutcome::Spawned),
            Ok(Some(orphan)) => {
                // Only possible if the spawn guard was bypassed.
                tracing::warn!(agent = ?orphan, "replacing a live agent handle; closing the old one");
                if let Err(e) = self.agent.close(orphan).await {
                    tracing::error!(error = %e, "failed to close replaced agent");
                }
                Ok(SpawnOutcome::Spawned)
            }
            Err(late) => {
                tracing::info!(agent = ?late, "retracted while launching; closing new agent");
                if let Err(e) = self.agent.close(late).await {
                    tracing::warn!(error = %e, "agent teardown failed; handle released");
                }
                Ok(SpawnOutcome::Retracted)
            }
        }
    }

    /// Retract the agent. No-op when there is none or a kill is in flight.
    /// A launch still in progress is told to close its agent on arrival.
    pub async fn kill(&self) -> KillOutcome {
        let Some(_guard) = InFlight::acquire(&self.killing) else {
            tracing::debug!("kill already in flight");
            return KillOutcome::InFlight;
        };
        let taken = {
            let mut slot = lock(&self.slot);
            slot.retracts += 1;
            slot.session.take()
        };
        let Some(session) = taken else {
            if self.is_spawning() {
                tracing::info!("agent still launching; it will be closed on arrival");
            }
            return KillOutcome::NoAgent;
        };

        tracing::info!(agent = ?session, "retracting agent");
        match self.agent.close(session).await {
            Ok(()) => KillOutcome::Released,
            Err(e) => {
                tracing::warn!(error = %e, "agent teardown failed; handle released");
                KillOutcome::ReleaseFailed
            }
        }
    }

    /// Refuse further launches, let an in-flight launch close what it
    /// started, then kill. All of it bounded by `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Option<KillOutcome> {
        {
            let mut slot = lock(&self.slot);
            slot.closed = true;
            slot.retracts += 1;
        }
        let retract = async {
            wait_idle(&self.spawning).await;
            wait_idle(&self.killing).await;
            self.kill().await
        };
        match tokio::time::timeout(deadline, retract).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::warn!(?deadline, "agent retraction exceeded shutdown deadline");
                None
            }
        }
    }
}
