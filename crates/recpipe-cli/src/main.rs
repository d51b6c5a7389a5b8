//! recpipe - migrate Zoom cloud recordings into Box.
//!
//! Commands:
//! - `run` - execute the migration for all active users
//! - `status` - inspect the download status store
//! - `users` - list or reset rows of the active users file
//! - `config` - show or validate the configuration
//!
//! Exit codes: 0 success; 1 configuration/credential failure; 2 one or
//! more users failed; 3 and up, fatal runtime errors.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use recpipe_core::config::Config;

mod commands;
mod logging;

use commands::config::ConfigCommand;
use commands::run::RunCommand;
use commands::status::StatusCommand;
use commands::users::UsersCommand;

#[derive(Debug, Parser)]
#[command(
    name = "recpipe",
    version,
    about = "Migrate Zoom cloud recordings into Box"
)]
pub struct Cli {
    /// Use an alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the migration for all active users
    Run(RunCommand),
    /// Inspect the download status store
    Status(StatusCommand),
    /// List or reset active users
    Users(UsersCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_path);
    let config = if config_path.exists() {
        match Config::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", config_path.display());
                return ExitCode::from(1);
            }
        }
    } else {
        Config::from_env()
    };

    let _log_guard = match logging::init(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::from(3);
        }
    };

    let result = match cli.command {
        Commands::Run(cmd) => cmd.execute(config).await,
        Commands::Status(cmd) => cmd.execute(config).await,
        Commands::Users(cmd) => cmd.execute(config).await,
        Commands::Config(cmd) => cmd.execute(config).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(3)
        }
    }
}
