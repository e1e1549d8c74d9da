//! Server orchestration: command-line parsing, administrative commands and
//! the HTTP daemon.
//!
//! The binary stays a thin wrapper around [`run`].

pub mod admin;
pub mod cli;
pub mod daemon;

use anyhow::Result;
use clap::Parser;
pub use cli::{AppConfig, Cli, Commands, ConfigArgs, CreateLibrarianArgs};
pub use daemon::run_daemon;

/// Parse CLI arguments and execute the requested command or daemon.
///
/// # Errors
///
/// Returns any error emitted while resolving configuration or running the
/// selected action.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli).await
}

/// Execute the server logic using an already parsed [`Cli`].
///
/// # Errors
///
/// Propagates configuration failures and any failure of the selected action.
pub async fn run_with_cli(cli: Cli) -> Result<()> {
    let Cli { config, command } = cli;
    let cfg = AppConfig::load(&config)?;
    if let Some(command) = command {
        admin::run_command(command, &cfg).await
    } else {
        run_daemon(cfg).await
    }
}
