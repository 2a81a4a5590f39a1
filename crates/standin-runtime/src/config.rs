//! Validated runtime configuration assembled from CLI flags and env.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use standin_agent::LaunchConfig;

use crate::cli::ServeOpts;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("target url must start with http:// or https://, got '{0}'")]
    InvalidTargetUrl(String),
    #[error("mount path must start with '/', got '{0}'")]
    InvalidMount(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: SocketAddr,
    /// Normalized prefix: empty for root, otherwise `/a/b` with no trailing slash.
    pub mount: String,
    pub target_url: String,
    pub heartbeat_timeout_ms: u64,
    pub check_interval: Duration,
    pub debounce_ms: u64,
    pub max_spawns_per_minute: u32,
    pub shutdown_deadline: Duration,
    pub beacon_interval_ms: u64,
    pub launch: LaunchConfig,
}

impl RuntimeConfig {
    pub fn from_opts(opts: &ServeOpts) -> Result<Self, ConfigError> {
        let ip: IpAddr = opts
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(opts.bind.clone()))?;

        nonzero("heartbeat-timeout-ms", opts.heartbeat_timeout_ms)?;
        nonzero("check-interval-ms", opts.check_interval_ms)?;
        nonzero("debounce-ms", opts.debounce_ms)?;
        nonzero("max-spawns-per-minute", u64::from(opts.max_spawns_per_minute))?;
        nonzero("launch-timeout-secs", opts.launch_timeout_secs)?;
        nonzero("teardown-timeout-secs", opts.teardown_timeout_secs)?;
        nonzero("shutdown-deadline-secs", opts.shutdown_deadline_secs)?;
        nonzero("beacon-interval-ms", opts.beacon_interval_ms)?;

        let mount = normalize_mount(&opts.mount)?;
        let target_url = match &opts.target_url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.clone(),
            Some(url) => return Err(ConfigError::InvalidTargetUrl(url.clone())),
            None => format!("http://localhost:{}/", opts.port),
        };

        let mut launch = LaunchConfig::default().with_extra_args(opts.browser_args.iter().cloned());
        if let Some(bin) = &opts.browser_bin {
            launch = launch.with_browser_bin(bin);
        }
        launch.launch_timeout = Duration::from_secs(opts.launch_timeout_secs);
        launch.teardown_timeout = Duration::from_secs(opts.teardown_timeout_secs);

        Ok(Self {
            listen: SocketAddr::new(ip, opts.port),
            mount,
            target_url,
            heartbeat_timeout_ms: opts.heartbeat_timeout_ms,
            check_interval: Duration::from_millis(opts.check_interval_ms),
            debounce_ms: opts.debounce_ms,
            max_spawns_per_minute: opts.max_spawns_per_minute,
            shutdown_deadline: Duration::from_secs(opts.shutdown_deadline_secs),
            beacon_interval_ms: opts.beacon_interval_ms,
            launch,
        })
    }
}

fn nonzero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero(name))
    } else {
        Ok(())
    }
}

/// `/` becomes the empty prefix; trailing slashes are dropped.
pub fn normalize_mount(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return Err(ConfigError::InvalidMount(raw.to_string()));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
