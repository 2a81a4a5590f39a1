//! standin-agent: IO boundary for the stand-in process.
//! Provides the `Agent` capability trait and a headless Chromium
//! implementation driven over the DevTools protocol. No liveness logic here.

pub mod agent;
pub mod cdp;
pub mod chromium;
pub mod error;
pub mod idle;
pub mod launch;
pub mod script;

pub use agent::Agent;
pub use chromium::{ChromiumAgent, ChromiumSession};
pub use error::AgentError;
pub use launch::{AGENT_FLAGS, LaunchConfig};
