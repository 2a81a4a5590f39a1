//! standin-core: liveness tracking and transition control for the stand-in
//! agent, expressed as pure state machines.
//!
//! Nothing in this crate reads a clock or performs IO. Callers pass
//! `now_ms` (milliseconds on a monotonic timeline of their choosing) and
//! act on the returned decisions.

pub mod heartbeat;
pub mod identity;
pub mod rate_limit;
pub mod transition;
pub mod types;

pub use heartbeat::HeartbeatTracker;
pub use rate_limit::SpawnRateLimiter;
pub use transition::{
    FireAction, PendingTransition, RequestOutcome, TransitionMachine, TransitionToken,
};
pub use types::{LivenessState, SignalOrigin, StandinError};
