//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "standin",
    about = "Keep a session-backed service occupied with a headless stand-in"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the heartbeat endpoints and the control loop
    Serve(ServeOpts),
    /// Query a running instance
    Status(StatusOpts),
    /// Emit heartbeats to a running instance as a native client
    Beacon(BeaconOpts),
    /// Print the agent browser launch flags
    Flags,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeOpts {
    /// Address to bind
    #[arg(long, env = "STANDIN_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Path prefix for the endpoints (e.g. /api/plugins/standin)
    #[arg(long, env = "STANDIN_MOUNT", default_value = "/")]
    pub mount: String,

    /// URL the agent opens (default: http://localhost:<port>/)
    #[arg(long, env = "STANDIN_TARGET_URL")]
    pub target_url: Option<String>,

    /// A client is alive while its last heartbeat is younger than this
    #[arg(long, default_value = "10000")]
    pub heartbeat_timeout_ms: u64,

    /// Control loop period
    #[arg(long, default_value = "2000")]
    pub check_interval_ms: u64,

    /// Delay before a requested transition commits
    #[arg(long, default_value = "3000")]
    pub debounce_ms: u64,

    /// Agent launch attempts admitted per 60s window
    #[arg(long, default_value = "3")]
    pub max_spawns_per_minute: u32,

    /// Bound on agent launch, navigation and settle
    #[arg(long, default_value = "45")]
    pub launch_timeout_secs: u64,

    /// Bound on a graceful agent close before it is killed
    #[arg(long, default_value = "10")]
    pub teardown_timeout_secs: u64,

    /// Bound on agent retraction during shutdown
    #[arg(long, default_value = "5")]
    pub shutdown_deadline_secs: u64,

    /// Interval the served beacon script heartbeats at
    #[arg(long, default_value = "2000")]
    pub beacon_interval_ms: u64,

    /// Browser binary for the agent
    #[arg(long, env = "STANDIN_BROWSER_BIN")]
    pub browser_bin: Option<PathBuf>,

    /// Extra browser flag (repeatable)
    #[arg(long = "browser-arg", allow_hyphen_values = true)]
    pub browser_args: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatusOpts {
    /// Base URL of the running instance
    #[arg(long, env = "STANDIN_URL", default_value = "http://127.0.0.1:8000")]
    pub url: String,

    /// Path prefix the endpoints are mounted at
    #[arg(long, env = "STANDIN_MOUNT", default_value = "/")]
    pub mount: String,

    /// One line instead of JSON
    #[arg(long)]
    pub short: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BeaconOpts {
    /// Base URL of the running instance
    #[arg(long, env = "STANDIN_URL", default_value = "http://127.0.0.1:8000")]
    pub url: String,

    /// Path prefix the endpoints are mounted at
    #[arg(long, env = "STANDIN_MOUNT", default_value = "/")]
    pub mount: String,

    /// Heartbeat period
    #[arg(long, default_value = "2000")]
    pub interval_ms: u64,
}
