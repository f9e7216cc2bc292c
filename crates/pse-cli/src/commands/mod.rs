mod maintenance;
mod sync;

pub use sync::printed_partial;

use std::sync::Arc;

use pse_core::Sink;
use pse_warehouse::{DuckDbSink, LakeSink};

use crate::cli::{Action, Destination};
use crate::config::RunConfig;
use crate::error::CliError;
use crate::output::Envelope;

/// Opens the configured destination.
pub fn open_sink(config: &RunConfig) -> Result<Arc<dyn Sink>, CliError> {
    let sink: Arc<dyn Sink> = match config.destination {
        Destination::Duckdb => Arc::new(DuckDbSink::open(&config.warehouse)?),
        Destination::Lake => Arc::new(LakeSink::open(config.lake.clone())?),
    };
    Ok(sink)
}

pub async fn run(config: &RunConfig) -> Result<Envelope, CliError> {
    let sink = open_sink(config)?;
    match config.action {
        Action::Initdb => maintenance::initdb(config, sink).await,
        Action::Reset => maintenance::reset(config, sink).await,
        Action::Sync | Action::Backfill => sync::run(config, sink).await,
    }
}
