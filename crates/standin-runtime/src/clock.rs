use std::time::Duration;

use tokio::time::Instant;

/// Monotonic millisecond timeline shared by the controller and supervisor.
///
/// The core state machines take `now_ms: u64`; this maps tokio's clock onto
/// that timeline so paused-time tests drive everything consistently.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Tokio instant corresponding to a point on the timeline.
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
