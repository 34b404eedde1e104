use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "otalogin-agent")]
#[command(version, about = "Runs OTA login jobs in a local Chrome")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// State directory (defaults to <local data dir>/otalogin)
    #[arg(long, global = true, env = "OTALOGIN_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Config file (defaults to config.ron in the state directory)
    #[arg(long, global = true, env = "OTALOGIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Job source API base URL
    #[arg(long, global = true, env = "OTALOGIN_API_BASE")]
    pub api_base: Option<String>,

    /// Chrome DevTools HTTP endpoint
    #[arg(long, global = true, env = "OTALOGIN_DEVTOOLS")]
    pub devtools: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll for jobs until interrupted
    Run,
    /// Run one poll cycle now
    Poll,
    /// Pair this agent with a portal
    Pair(PairArgs),
    /// Forget the pairing
    Unpair,
    /// Show pairing and polling state
    Status,
    /// Turn periodic polling on or off
    Polling {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// List known channels
    Channels,
}

#[derive(Args, Debug)]
pub struct PairArgs {
    /// Six-character code shown in the portal
    #[arg(long)]
    pub code: String,

    #[arg(long)]
    pub device_name: String,

    /// Portal URL, e.g. https://portal.example
    #[arg(long)]
    pub portal_url: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}
