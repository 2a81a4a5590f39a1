//! Scriptable in-memory agent for runtime tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use standin_agent::{Agent, AgentError};

#[derive(Debug, PartialEq, Eq)]
pub struct FakeSession(pub usize);

#[derive(Default)]
pub struct FakeAgent {
    pub launch_delay: Duration,
    pub fail_launch: AtomicBool,
    pub fail_close: AtomicBool,
    launches: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl FakeAgent {
    pub fn with_launch_delay(delay: Duration) -> Self {
        Self {
            launch_delay: delay,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently live sessions.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FakeAgent {
    type Session = FakeSession;

    async fn launch(&self, target_url: &str) -> Result<FakeSession, AgentError> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(AgentError::NavigationFailed {
                url: target_url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(FakeSession(n))
    }

    async fn close(&self, _session: FakeSession) -> Result<(), AgentError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(AgentError::TeardownFailed("kill: no such process".to_string()));
        }
        Ok(())
    }
}
