//! Sliding-window limiter for stand-in spawn attempts.
//!
//! Attempts are recorded only when admitted. Old entries are pruned lazily
//! on the next admission check, so the log never holds more than
//! `max_attempts` timestamps.

use std::collections::VecDeque;

/// Sliding window length (milliseconds).
pub const DEFAULT_SPAWN_WINDOW_MS: u64 = 60_000;

/// Maximum admitted spawn attempts per window.
pub const DEFAULT_MAX_SPAWN_ATTEMPTS_PER_MINUTE: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRateLimiter {
    /// Admitted attempt timestamps, oldest first.
    attempts: VecDeque<u64>,
    window_ms: u64,
    max_attempts: u32,
}

impl SpawnRateLimiter {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_window(max_attempts, DEFAULT_SPAWN_WINDOW_MS)
    }

    pub fn with_window(max_attempts: u32, window_ms: u64) -> Self {
        Self {
            attempts: VecDeque::with_capacity(max_attempts as usize),
            window_ms,
            max_attempts,
        }
    }

    /// Admission check. Records the attempt and returns `true` when the
    /// window has capacity; returns `false` without recording otherwise.
    pub fn can_spawn(&mut self, now_ms: u64) -> bool {
        self.prune(now_ms);
        if self.attempts.len() >= self.max_attempts as usize {
            return false;
        }
        self.attempts.push_back(now_ms);
        true
    }

    /// Attempts still admissible at `now_ms`. Does not record anything.
    pub fn remaining(&self, now_ms: u64) -> u32 {
        let used = self
            .attempts
            .iter()
            .filter(|&&ts| self.in_window(ts, now_ms))
            .count();
        self.max_attempts.saturating_sub(used as u32)
    }

    /// Earliest instant a slot frees up, or `None` if one is free now.
    pub fn next_slot_at(&self, now_ms: u64) -> Option<u64> {
        if self.remaining(now_ms) > 0 {
            return None;
        }
        self.attempts
            .iter()
            .find(|&&ts| self.in_window(ts, now_ms))
            .map(|&oldest| oldest.saturating_add(self.window_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn in_window(&self, ts: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(ts) < self.window_ms
    }

    fn prune(&mut self, now_ms: u64) {
        while let Some(&oldest) = self.attempts.front() {
            if self.in_window(oldest, now_ms) {
                break;
            }
            self.attempts.pop_front();
        }
    }
}

impl Default for SpawnRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPAWN_ATTEMPTS_PER_MINUTE)
    }
}
