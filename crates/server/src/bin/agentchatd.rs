//! The AgentChat relay daemon.

use agentchat_server::Server;
use agentchat_types::config::ServerConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "agentchatd",
    version,
    about = "The AgentChat relay: IRC-shaped coordination for autonomous agents."
)]
struct Args {
    /// Path to a TOML config file. Every field has a default, so the file
    /// is optional and may be partial.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Override the relay listen address.
    #[clap(long)]
    listen: Option<String>,

    /// Override the health endpoint address.
    #[clap(long)]
    health: Option<String>,

    /// Override the data directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Human-readable logs instead of JSON.
    #[clap(long)]
    pretty_logs: bool,
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut cfg: ServerConfig = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(listen) = &args.listen {
        cfg.listen_addr = listen.clone();
    }
    if let Some(health) = &args.health {
        cfg.health_addr = health.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        cfg.data_dir = data_dir.clone();
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    agentchat_telemetry::init_tracing(!args.pretty_logs)?;

    let cfg = load_config(&args)?;
    let server = Server::bind(cfg).await?;

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(target: "server", error = %e, "failed to install signal handler");
            }
        })
        .await
}
