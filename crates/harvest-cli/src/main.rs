//! Harvest CLI - field capture, sync and payroll from the command line
//!
//! Every command works offline against the local store; `sync` pushes the
//! queue when the remote is configured.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::Context;
use crate::commands::{completions, config, crew, dlq, field, payroll, queue, settings, sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harvest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return completions::run_completions(*shell, output.as_deref());
    }

    let context = Context::load(cli.config, cli.db_path, cli.orchard)?;

    match cli.command {
        Commands::Scan { code, grade } => field::run_scan(&context, &code, grade.into()).await,
        Commands::CheckIn { code } => field::run_check_in(&context, &code).await,
        Commands::CheckOut { code } => field::run_check_out(&context, &code).await,
        Commands::Break { code, meal } => field::run_break(&context, &code, meal).await,
        Commands::Crew { command } => crew::run_crew(&context, command).await,
        Commands::Queue { json } => queue::run_queue(&context, json).await,
        Commands::Sync { watch } => sync::run_sync(&context, watch).await,
        Commands::Dlq { command } => dlq::run_dlq(&context, command).await,
        Commands::Payroll { json } => payroll::run_payroll(&context, json).await,
        Commands::Compliance { json } => payroll::run_compliance(&context, json).await,
        Commands::Settings { command } => settings::run_settings(&context, command).await,
        Commands::Export { format, output } => {
            payroll::run_export(&context, format.into(), output.as_deref()).await
        }
        Commands::Config { command } => config::run_config(&context, command),
        Commands::Completions { shell, output } => {
            completions::run_completions(shell, output.as_deref())
        }
    }
}
