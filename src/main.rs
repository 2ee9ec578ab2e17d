mod commands;
mod domain;
mod services;
#[cfg(test)]
mod test_support;

use std::process::ExitCode;

use crate::commands::base_commands::{CacheAction, CliArgs, Commands};
use crate::commands::cache_cmd::{clear_cache_command, invalidate_cache_command};
use crate::commands::completions_cmd::completions_command;
use crate::commands::fetch_cmd::fetch_command;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Commands::Fetch {
            source,
            months,
            config,
            output,
            refresh,
        } => fetch_command(source, months, config, output, refresh).await,
        Commands::Cache { action } => match action {
            CacheAction::Clear { config } => clear_cache_command(config).await,
            CacheAction::Invalidate {
                source,
                month,
                config,
            } => invalidate_cache_command(source, month, config).await,
        },
        Commands::Completions { shell } => {
            completions_command(shell);
            ExitCode::SUCCESS
        }
    }
}
