mod cli;
mod commands;
mod config;
mod error;
mod output;
mod telemetry;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::config::RunConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.log_format)?;

    let config = RunConfig::from_cli(&cli)?;
    tracing::info!(
        action = config.action.as_str(),
        destination = config.destination.as_str(),
        concurrency = config.params.concurrency,
        "pse-etl starting"
    );

    let envelope = match commands::run(&config).await {
        Ok(envelope) => envelope,
        Err(error) => {
            if !commands::printed_partial(&error) {
                tracing::error!(%error, "run aborted");
            }
            return Err(error);
        }
    };
    output::render(&envelope, config.pretty)?;

    Ok(ExitCode::SUCCESS)
}
