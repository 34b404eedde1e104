mod cli;
mod commands;
mod config;
mod logging;
mod source;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use commands::AgentContext;
use config::{AgentConfig, CONFIG_FILENAME};
use otalogin_engine::{StateStore, DEFAULT_DEVTOOLS_ENDPOINT};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let state_dir = match cli.state_dir.clone() {
        Some(dir) => dir,
        None => default_state_dir()?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| state_dir.join(CONFIG_FILENAME));
    let config = AgentConfig::load(&config_path)?;

    let destination = match cli.command {
        Command::Run => config.log_destination,
        _ => logging::LogDestination::Terminal,
    };
    logging::initialize(destination, cli.verbose, &config.log_file)?;

    let devtools_endpoint = cli
        .devtools
        .clone()
        .unwrap_or_else(|| config.devtools_endpoint.clone());
    let ctx = AgentContext {
        store: StateStore::new(state_dir),
        api_base_override: cli.api_base.clone(),
        devtools_endpoint: if devtools_endpoint.trim().is_empty() {
            DEFAULT_DEVTOOLS_ENDPOINT.to_string()
        } else {
            devtools_endpoint
        },
        config,
    };

    match &cli.command {
        Command::Run => commands::run(&ctx).await,
        Command::Poll => commands::poll(&ctx).await,
        Command::Pair(args) => commands::pair(&ctx, args).await,
        Command::Unpair => commands::unpair(&ctx),
        Command::Status => commands::status(&ctx),
        Command::Polling { state } => commands::set_polling(&ctx, state.enabled()),
        Command::Channels => commands::channels(&ctx),
    }
}

fn default_state_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("otalogin"))
        .context("no local data directory on this system; pass --state-dir")
}
