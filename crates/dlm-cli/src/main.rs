//! `dlm` - acquire and inspect quorum locks from the command line.

mod commands;
mod logging;
mod settings;

use std::time::Duration;

use clap::Parser;

use dlm_core::LockManagerConfig;

use crate::logging::{LoggingConfig, init_logging};
use crate::settings::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging_guard = init_logging(&LoggingConfig::from_env())?;

    dlm_core::metrics::describe_metrics();

    let layered = settings::load(&cli)?;
    let manager_config = LockManagerConfig::from_config(&layered)?;
    tracing::debug!(?manager_config, "Loaded configuration");

    match cli.command {
        Command::Hold {
            resource,
            ttl_ms,
            max_renew,
            hold_ms,
        } => {
            commands::hold(
                manager_config,
                &resource,
                ttl_ms,
                max_renew,
                Duration::from_millis(hold_ms),
            )
            .await
        }
        Command::Probe => commands::probe(manager_config).await,
    }
}
