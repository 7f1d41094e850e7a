//! CLI entry and dispatch.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

mod commands;

/// How long shutdown waits for a stdin read still parked on the blocking pool.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "waifu")]
#[command(version)]
#[command(about = "Voice chat with your AI avatar from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Text only: do not synthesize or play speech
    #[arg(long = "no-voice")]
    no_voice: bool,

    /// Write debug-level logs
    #[arg(long)]
    debug: bool,

    /// Output device index or name fragment (overrides config)
    #[arg(long, value_name = "SEL")]
    output_device: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List audio output devices
    Devices,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Print a fresh config rendered from built-in defaults
    Generate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    let result = rt.block_on(dispatch(cli));
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        no_voice,
        debug,
        output_device,
    } = cli;

    // default to chat mode
    let Some(command) = command else {
        let config = waifu_core::config::Config::load().context("load config")?;
        return commands::chat::run(
            &config,
            &commands::chat::ChatOptions {
                no_voice,
                debug,
                output_device: output_device.as_deref(),
            },
        )
        .await;
    };

    match command {
        Commands::Devices => commands::devices::list(),
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },
    }
}
