//! The `Agent` capability: launch a stand-in against a URL and close it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentError;

/// Capability that starts and stops the stand-in process.
///
/// Contract for implementations:
/// - `launch` injects the self-identity flag and tags every outbound
///   request with [`standin_core::identity::SELF_ORIGIN_HEADER`] before the
///   target page runs any script, then navigates and waits for the page to
///   settle.
/// - A failed `launch` has already released every resource it created.
/// - `close` consumes the session; after it returns the process is gone or
///   the error says why it could not be reaped.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    type Session: std::fmt::Debug + Send + 'static;

    async fn launch(&self, target_url: &str) -> Result<Self::Session, AgentError>;

    async fn close(&self, session: Self::Session) -> Result<(), AgentError>;
}

#[async_trait]
impl<T: Agent> Agent for Arc<T> {
    type Session = T::Session;

    async fn launch(&self, target_url: &str) -> Result<Self::Session, AgentError> {
        (**self).launch(target_url).await
    }

    async fn close(&self, session: Self::Session) -> Result<(), AgentError> {
        (**self).close(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        launches: AtomicUsize,
    }

    #[async_trait]
    impl Agent for Counting {
        type Session = usize;

        async fn launch(&self, _target_url: &str) -> Result<usize, AgentError> {
            Ok(self.launches.fetch_add(1, Ordering::SeqCst))
        }

        async fn close(&self, _session: usize) -> Result<(), AgentError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn arc_forwards_to_inner() {
        let inner = Arc::new(Counting {
            launches: AtomicUsize::new(0),
        });
        let shared = Arc::clone(&inner);
        assert_eq!(shared.launch("http://localhost").await.expect("launch"), 0);
        assert_eq!(shared.launch("http://localhost").await.expect("launch"), 1);
        shared.close(1).await.expect("close");
        assert_eq!(inner.launches.load(Ordering::SeqCst), 2);
    }
}
