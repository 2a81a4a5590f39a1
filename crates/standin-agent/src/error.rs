//! Error types for the agent backend.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no browser binary could be started: {0}")]
    BrowserNotFound(String),

    #[error("browser exited during launch: {0}")]
    BrowserExited(String),

    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("DevTools command '{method}' failed ({code}): {message}")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    #[error("DevTools command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },

    #[error("DevTools protocol error: {0}")]
    Protocol(String),

    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("agent launch did not finish within {0:?}")]
    LaunchTimeout(Duration),

    #[error("agent teardown failed: {0}")]
    TeardownFailed(String),

    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),
}
