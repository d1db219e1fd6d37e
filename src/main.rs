use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use roost::app::App;
use roost::config::{AppConfig, RepoLayout};

/// Single-worker turn engine for a long-running conversational agent.
#[derive(Parser, Debug)]
#[command(name = "roost", version, about)]
struct Args {
    /// Agent home directory (config.yaml, scheduler.yaml, blocks/, logs/)
    #[arg(long, env = "ROOST_HOME", default_value = ".")]
    home: PathBuf,

    /// Loopback API port; overrides `api_port` in config.yaml (0 disables)
    #[arg(long, env = "ROOST_API_PORT")]
    api_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let layout = RepoLayout::new(args.home);
    layout
        .bootstrap()
        .with_context(|| format!("failed to prepare {}", layout.home.display()))?;
    let mut config = AppConfig::load(&layout).context("failed to load config.yaml")?;
    if let Some(port) = args.api_port {
        config.api_port = port;
    }
    roost::logging::init(&layout).context("failed to initialize logging")?;

    App::new(layout, config).run().await?;
    Ok(())
}
