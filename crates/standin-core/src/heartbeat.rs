//! Heartbeat tracker: last time a genuine client proved it was alive.
//!
//! Only the latest timestamp is kept. Self-originated signals are counted
//! for reporting but never touch `last_seen`.

use crate::types::SignalOrigin;

/// Default liveness timeout (milliseconds).
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatTracker {
    last_seen_ms: Option<u64>,
    timeout_ms: u64,
    accepted: u64,
    suppressed: u64,
}

impl HeartbeatTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            last_seen_ms: None,
            timeout_ms,
            accepted: 0,
            suppressed: 0,
        }
    }

    /// Record a presence signal. Returns `true` when it updated `last_seen`.
    pub fn record_signal(&mut self, origin: SignalOrigin, now_ms: u64) -> bool {
        if origin.is_self() {
            self.suppressed = self.suppressed.saturating_add(1);
            return false;
        }
        self.last_seen_ms = Some(now_ms);
        self.accepted = self.accepted.saturating_add(1);
        true
    }

    /// `now - last_seen < timeout`. Never alive before the first genuine signal.
    pub fn is_alive(&self, now_ms: u64) -> bool {
        self.since_last_seen(now_ms)
            .is_some_and(|elapsed| elapsed < self.timeout_ms)
    }

    /// Milliseconds since the last genuine signal, if any was seen.
    pub fn since_last_seen(&self, now_ms: u64) -> Option<u64> {
        self.last_seen_ms.map(|seen| now_ms.saturating_sub(seen))
    }

    pub fn last_seen_ms(&self) -> Option<u64> {
        self.last_seen_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn accepted_signals(&self) -> u64 {
        self.accepted
    }

    pub fn suppressed_signals(&self) -> u64 {
        self.suppressed
    }
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TIMEOUT: u64 = DEFAULT_HEARTBEAT_TIMEOUT_MS;

    #[test]
    fn never_seen_is_not_alive() {
        let tracker = HeartbeatTracker::default();
        assert!(!tracker.is_alive(0));
        assert!(!tracker.is_alive(2_000));
        assert_eq!(tracker.since_last_seen(2_000), None);
    }

    #[test]
    fn genuine_signal_keeps_alive_until_timeout() {
        let mut tracker = HeartbeatTracker::default();
        assert!(tracker.record_signal(SignalOrigin::Genuine, 1_000));
        assert!(tracker.is_alive(1_000));
        assert!(tracker.is_alive(1_000 + TIMEOUT - 1));
        // Strict less-than: exactly at the timeout the client is gone.
        assert!(!tracker.is_alive(1_000 + TIMEOUT));
    }

    #[test]
    fn self_signal_is_counted_but_ignored() {
        let mut tracker = HeartbeatTracker::default();
        assert!(!tracker.record_signal(SignalOrigin::SelfOrigin, 500));
        assert_eq!(tracker.last_seen_ms(), None);
        assert_eq!(tracker.suppressed_signals(), 1);
        assert_eq!(tracker.accepted_signals(), 0);
    }

    #[test]
    fn repeated_signal_is_idempotent_at_same_instant() {
        let mut tracker = HeartbeatTracker::default();
        tracker.record_signal(SignalOrigin::Genuine, 42);
        let first = tracker.last_seen_ms();
        tracker.record_signal(SignalOrigin::Genuine, 42);
        assert_eq!(tracker.last_seen_ms(), first);
    }

    #[test]
    fn clock_skew_backwards_reads_as_alive() {
        let mut tracker = HeartbeatTracker::new(1_000);
        tracker.record_signal(SignalOrigin::Genuine, 5_000);
        assert!(tracker.is_alive(4_000));
    }

    proptest! {
        /// Signals spaced strictly below the timeout keep the client alive
        /// throughout and for a full timeout after the last one.
        #[test]
        fn closely_spaced_signals_stay_alive(
            start in 0u64..1_000_000,
            gaps in proptest::collection::vec(1u64..TIMEOUT, 1..20),
        ) {
            let mut tracker = HeartbeatTracker::default();
            let mut t = start;
            tracker.record_signal(SignalOrigin::Genuine, t);
            for gap in gaps {
                // Probe just before the next signal lands.
                prop_assert!(tracker.is_alive(t + gap - 1));
                t += gap;
                tracker.record_signal(SignalOrigin::Genuine, t);
                prop_assert!(tracker.is_alive(t));
            }
            prop_assert!(tracker.is_alive(t + TIMEOUT - 1));
            prop_assert!(!tracker.is_alive(t + TIMEOUT));
        }

        /// No number of self-tagged signals ever moves `last_seen`.
        #[test]
        fn self_signals_never_move_last_seen(
            genuine_at in proptest::option::of(0u64..1_000_000),
            self_times in proptest::collection::vec(0u64..2_000_000, 0..50),
        ) {
            let mut tracker = HeartbeatTracker::default();
            if let Some(t) = genuine_at {
                tracker.record_signal(SignalOrigin::Genuine, t);
            }
            let before = tracker.last_seen_ms();
            for t in &self_times {
                tracker.record_signal(SignalOrigin::SelfOrigin, *t);
            }
            prop_assert_eq!(tracker.last_seen_ms(), before);
            prop_assert_eq!(tracker.suppressed_signals(), self_times.len() as u64);
        }
    }
}
