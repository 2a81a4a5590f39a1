//! Launch configuration for the headless browser agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Documented agent flags. Headless, sandbox off (locked-down hosts have no
/// user namespaces), and GPU/audio/background throttling off so the agent
/// behaves the same whether or not anything is watching it.
pub const AGENT_FLAGS: &[&str] = &[
    "--headless=new",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--mute-audio",
    "--disable-renderer-backgrounding",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
];

/// Profile housekeeping flags; keep first-run UI out of the way.
const PROFILE_FLAGS: &[&str] = &["--no-first-run", "--no-default-browser-check"];

/// Default bound on launch + navigate + settle.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Default bound on a graceful close before the process is killed.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Explicit browser binary; tried before the platform defaults.
    pub browser_bin: Option<PathBuf>,
    /// Extra flags appended after [`AGENT_FLAGS`].
    pub extra_args: Vec<String>,
    pub launch_timeout: Duration,
    pub teardown_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            browser_bin: None,
            extra_args: Vec::new(),
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

impl LaunchConfig {
    #[must_use]
    pub fn with_browser_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.browser_bin = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    /// Full argument list for one launch.
    pub fn build_args(&self, debug_port: u16, profile_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={debug_port}"),
            "--remote-debugging-address=127.0.0.1".to_string(),
            format!("--user-data-dir={}", profile_dir.display()),
        ];
        args.extend(PROFILE_FLAGS.iter().map(|s| s.to_string()));
        args.extend(AGENT_FLAGS.iter().map(|s| s.to_string()));
        args.extend(
            self.extra_args
                .iter()
                .filter(|a| !a.trim().is_empty())
                .cloned(),
        );
        args.push("about:blank".to_string());
        args
    }

    /// Binaries to try, in order.
    pub fn binary_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.browser_bin {
            candidates.push(path.clone());
        }
        candidates.extend(
            [
                "chromium",
                "chromium-browser",
                "google-chrome",
                "google-chrome-stable",
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ]
            .iter()
            .map(PathBuf::from),
        );
        candidates
    }
}

/// Ask the OS for a free loopback port for the debugging endpoint.
pub fn pick_debug_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
