//! Network quiescence tracking from DevTools `Network.*` events.
//!
//! The page counts as idle once at most `max_inflight` requests have been
//! outstanding for a continuous `quiet` period.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// Requests tolerated in flight while still considered idle.
pub const DEFAULT_MAX_INFLIGHT: usize = 2;

/// Continuous quiet period required.
pub const DEFAULT_QUIET: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct NetworkIdleTracker {
    inflight: HashSet<String>,
    max_inflight: usize,
    quiet: Duration,
    /// When the in-flight count last dropped to `max_inflight` or below.
    quiet_since: Option<Instant>,
}

impl NetworkIdleTracker {
    pub fn new(max_inflight: usize, quiet: Duration, now: Instant) -> Self {
        Self {
            inflight: HashSet::new(),
            max_inflight,
            quiet,
            quiet_since: Some(now),
        }
    }

    /// Feed one DevTools event. Events outside the `Network` domain are
    /// ignored.
    pub fn on_event(&mut self, method: &str, params: &Value, now: Instant) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        match method {
            // Redirects reuse the request id, so the set absorbs them.
            "Network.requestWillBeSent" => {
                self.inflight.insert(request_id.to_string());
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                self.inflight.remove(request_id);
            }
            _ => return,
        }
        self.update_quiet(now);
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Instant at which the page becomes idle if nothing else happens.
    /// `None` while too many requests are outstanding.
    pub fn idle_at(&self) -> Option<Instant> {
        self.quiet_since.map(|since| since + self.quiet)
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        self.idle_at().is_some_and(|at| now >= at)
    }

    fn update_quiet(&mut self, now: Instant) {
        if self.inflight.len() > self.max_inflight {
            self.quiet_since = None;
        } else if self.quiet_since.is_none() {
            self.quiet_since = Some(now);
        }
    }
}

impl Default for NetworkIdleTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INFLIGHT, DEFAULT_QUIET, Instant::now())
    }
}
