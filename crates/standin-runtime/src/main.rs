//! standin: keeps a session-backed service occupied with a headless
//! stand-in while no real client is connected.

use clap::Parser;

mod beacon;
mod cli;
mod client;
mod clock;
mod config;
mod controller;
mod daemon;
mod server;
mod supervisor;
mod sync;
#[cfg(test)]
mod test_support;

fn init_tracing() {
    let filter = std::env::var("STANDIN_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Serve(opts) => {
            init_tracing();
            let config = config::RuntimeConfig::from_opts(&opts)?;
            tracing::info!("standin starting");
            daemon::run_daemon(config).await?;
        }
        cli::Command::Status(opts) => {
            client::cmd_status(&opts).await?;
        }
        cli::Command::Beacon(opts) => {
            init_tracing();
            client::cmd_beacon(&opts).await?;
        }
        cli::Command::Flags => {
            for flag in standin_agent::AGENT_FLAGS {
                println!("{flag}");
            }
        }
    }

    Ok(())
}
