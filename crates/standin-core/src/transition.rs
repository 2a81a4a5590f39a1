//! Debounced, cancellable transition machine for the liveness state.
//!
//! A transition is two-step: [`TransitionMachine::request`] arms a pending
//! transition with a fresh token and a deadline; when the deadline fires the
//! caller asks [`TransitionMachine::begin_fire`] what to do, performs the
//! side effect, and finishes with [`TransitionMachine::commit`].
//!
//! Cancellation is purely token based: arming a new request supersedes the
//! previous token, and every later step with a superseded token is a no-op.
//! The caller's timer primitive does not need to be reliable.

use serde::Serialize;

use crate::types::LivenessState;

/// Default control loop period (milliseconds).
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 2_000;

/// Default debounce before a requested transition fires (milliseconds).
pub const DEFAULT_DEBOUNCE_MS: u64 = 3_000;

// ─── Tokens ──────────────────────────────────────────────────────

/// Generation number of an armed transition. Only the latest is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TransitionToken(u64);

impl TransitionToken {
    pub fn generation(self) -> u64 {
        self.0
    }
}

/// The single armed transition, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransition {
    pub target: LivenessState,
    pub token: TransitionToken,
    pub fire_at_ms: u64,
}

// ─── Decisions ───────────────────────────────────────────────────

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Already transitioning toward the same target; nothing re-armed.
    Coalesced { pending: PendingTransition },
    /// A new transition was armed. `superseded` is the token it replaced.
    Armed {
        pending: PendingTransition,
        superseded: Option<TransitionToken>,
    },
}

impl RequestOutcome {
    pub fn pending(&self) -> PendingTransition {
        match self {
            Self::Coalesced { pending } | Self::Armed { pending, .. } => *pending,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed { .. })
    }
}

/// What a fired transition must do, after re-validating against liveness
/// as it is at fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireAction {
    /// Token was superseded: do nothing, mutate nothing.
    Stale,
    /// Start the agent; commit `GhostActive` on success, `NoClient` otherwise.
    Spawn,
    /// Retract the agent (no-op if none), then commit `commit`.
    Kill { commit: LivenessState },
    /// No side effect; commit the given settled state.
    Settle(LivenessState),
}

/// Control-loop decision table. Returns the target to request, if any.
///
/// `Transitioning` never requests: an armed transition re-validates on its
/// own when it fires.
pub fn evaluate(committed: LivenessState, alive: bool) -> Option<LivenessState> {
    use LivenessState::*;
    match (committed, alive) {
        (GhostActive | NoClient, true) => Some(RealActive),
        (RealActive | NoClient, false) => Some(GhostActive),
        (RealActive, true) | (GhostActive, false) | (Transitioning, _) => None,
    }
}

/// Re-validate a fired transition toward `target` against present liveness.
///
/// When the evidence that motivated the request no longer holds, the
/// transition is abandoned and the settled state is re-derived from what
/// is true now.
pub fn resolve_fire(target: LivenessState, alive: bool, agent_present: bool) -> FireAction {
    use LivenessState::*;
    match (target, alive) {
        (GhostActive, false) => FireAction::Spawn,
        (RealActive, true) | (GhostActive, true) => FireAction::Kill { commit: RealActive },
        (RealActive, false) if agent_present => FireAction::Settle(GhostActive),
        (RealActive, false) => FireAction::Settle(NoClient),
        // Only settled targets are ever armed; fall back to re-evaluation.
        (NoClient | Transitioning, _) => FireAction::Settle(NoClient),
    }
}

// ─── Machine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionMachine {
    state: LivenessState,
    pending: Option<PendingTransition>,
    next_generation: u64,
    debounce_ms: u64,
}

impl TransitionMachine {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            state: LivenessState::NoClient,
            pending: None,
            next_generation: 1,
            debounce_ms,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn pending(&self) -> Option<PendingTransition> {
        self.pending
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    /// Whether `token` is the armed one.
    pub fn is_current(&self, token: TransitionToken) -> bool {
        self.pending.is_some_and(|p| p.token == token)
    }

    /// One control-loop evaluation: decide and, if needed, request.
    pub fn tick(&mut self, alive: bool, now_ms: u64) -> Option<RequestOutcome> {
        evaluate(self.state, alive).map(|target| self.request(target, now_ms))
    }

    /// Arm a transition toward `target`, superseding any armed one.
    ///
    /// A duplicate request for the target already being transitioned to is
    /// coalesced and keeps the existing token and deadline.
    pub fn request(&mut self, target: LivenessState, now_ms: u64) -> RequestOutcome {
        if let Some(pending) = self.pending {
            if self.state == LivenessState::Transitioning && pending.target == target {
                return RequestOutcome::Coalesced { pending };
            }
        }

        let superseded = self.pending.take().map(|p| p.token);
        let token = TransitionToken(self.next_generation);
        self.next_generation = self.next_generation.saturating_add(1);

        let pending = PendingTransition {
            target,
            token,
            fire_at_ms: now_ms.saturating_add(self.debounce_ms),
        };
        self.state = LivenessState::Transitioning;
        self.pending = Some(pending);

        RequestOutcome::Armed {
            pending,
            superseded,
        }
    }

    /// Decide what a fired timer must do. Does not mutate.
    pub fn begin_fire(
        &self,
        token: TransitionToken,
        alive: bool,
        agent_present: bool,
    ) -> FireAction {
        match self.pending {
            Some(p) if p.token == token => resolve_fire(p.target, alive, agent_present),
            _ => FireAction::Stale,
        }
    }

    /// Commit a settled state for `token` and clear the pending transition.
    ///
    /// Returns `false` (and changes nothing) when `token` was superseded
    /// while its side effect was in flight; the newer transition owns the
    /// state from then on.
    pub fn commit(&mut self, token: TransitionToken, state: LivenessState) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.state = if state.is_settled() {
            state
        } else {
            LivenessState::NoClient
        };
        self.pending = None;
        true
    }

    /// Drop any armed transition without committing (shutdown path).
    ///
    /// A machine left `Transitioning` falls back to `NoClient`.
    pub fn cancel(&mut self) -> Option<PendingTransition> {
        let cancelled = self.pending.take();
        if self.state == LivenessState::Transitioning {
            self.state = LivenessState::NoClient;
        }
        cancelled
    }
}

impl Default for TransitionMachine {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}
