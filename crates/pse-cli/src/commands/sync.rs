use std::sync::Arc;

use pse_core::sink::run_blocking;
use pse_core::{
    JobMode, JobReport, PseEdgeAdapter, RegistrySync, Sink, StockSource, SyncEngine, SyncJob,
};
use tracing::{error, warn};

use crate::cli::Action;
use crate::config::RunConfig;
use crate::error::CliError;
use crate::output::{self, Envelope};

pub async fn run(config: &RunConfig, sink: Arc<dyn Sink>) -> Result<Envelope, CliError> {
    let source: Arc<dyn StockSource> = Arc::new(PseEdgeAdapter::new(config.source.clone()));
    run_with_source(config, source, sink).await
}

pub(crate) async fn run_with_source(
    config: &RunConfig,
    source: Arc<dyn StockSource>,
    sink: Arc<dyn Sink>,
) -> Result<Envelope, CliError> {
    run_blocking(Arc::clone(&sink), |sink| sink.initialize()).await?;

    let mode = match config.action {
        Action::Backfill => JobMode::Backfill,
        _ => JobMode::Sync,
    };
    let job = SyncJob::new(
        RegistrySync::new(Arc::clone(&source), Arc::clone(&sink)),
        SyncEngine::new(source, Arc::clone(&sink)).with_config(config.engine),
        Arc::clone(&sink),
    );

    match job.run(mode, config.params).await {
        Ok(report) => envelope(config, &report),
        Err(job_error) => {
            error!(error = %job_error, destination = sink.name(), "job failed");
            if let Some(partial) = job_error.partial_report() {
                output::render(&envelope(config, partial)?.failed(&job_error), config.pretty)?;
            }
            Err(CliError::Job(job_error))
        }
    }
}

fn envelope(config: &RunConfig, report: &JobReport) -> Result<Envelope, CliError> {
    let warnings = report
        .prices
        .unknown_symbols()
        .into_iter()
        .map(|symbol| format!("{symbol} is not known to the source"))
        .collect::<Vec<_>>();
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "symbols skipped as unknown");
    }

    Ok(Envelope::ok(config.action.as_str(), report.destination, serde_json::to_value(report)?)
        .with_warnings(warnings))
}

/// Whether a failed job already printed its partial report.
pub fn printed_partial(error: &CliError) -> bool {
    matches!(error, CliError::Job(job_error) if job_error.partial_report().is_some())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pse_core::{Company, PriceRecord, ScriptedSource, Symbol, UtcDateTime};
    use pse_warehouse::DuckDbSink;
    use tempfile::tempdir;
    use time::macros::date;

    use super::*;
    use crate::cli::Cli;

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("symbol")
    }

    fn company(value: &str) -> Company {
        Company::new(
            symbol(value),
            format!("{value} Holdings"),
            String::from("Industrial"),
            String::from("Other"),
            Some(date!(2020 - 01 - 01)),
            UtcDateTime::parse("2024-01-02T08:00:00Z").expect("ts"),
        )
        .expect("company")
    }

    fn price(value: &str, close: f64) -> PriceRecord {
        PriceRecord::new(
            symbol(value),
            date!(2024 - 01 - 02),
            close,
            close,
            close,
            close,
            UtcDateTime::parse("2024-01-02T08:00:00Z").expect("ts"),
        )
        .expect("price")
    }

    fn config_for(home: &std::path::Path, args: &[&str]) -> RunConfig {
        let home = home.to_string_lossy().into_owned();
        let argv = ["pse-etl", "--home", home.as_str()]
            .into_iter()
            .chain(args.iter().copied());
        RunConfig::from_cli(&Cli::try_parse_from(argv).expect("parse")).expect("config")
    }

    #[tokio::test]
    async fn backfill_writes_companies_and_prices() {
        let temp = tempdir().expect("tempdir");
        let config = config_for(temp.path(), &["-a", "backfill", "-c", "2"]);
        let source = ScriptedSource::new()
            .with_company(company("AAA"))
            .with_company(company("BBB"))
            .with_prices(vec![price("AAA", 10.0), price("BBB", 20.0)]);
        let sink = Arc::new(DuckDbSink::open(&config.warehouse).expect("open"));

        let envelope = run_with_source(&config, Arc::new(source), sink.clone())
            .await
            .expect("backfill");

        assert!(envelope.ok);
        assert_eq!(envelope.data["mode"], "backfill");
        assert_eq!(sink.companies().expect("companies").len(), 2);
        assert_eq!(sink.price_count().expect("count"), 2);
    }

    #[tokio::test]
    async fn failing_symbol_maps_to_symbols_failed_exit_code() {
        let temp = tempdir().expect("tempdir");
        let config = config_for(temp.path(), &["-a", "sync"]);
        let source = ScriptedSource::new()
            .with_company(company("AAA"))
            .with_company(company("BBB"))
            .with_prices(vec![price("AAA", 10.0)])
            .with_failure(symbol("BBB"), "upstream 503");
        let sink = Arc::new(DuckDbSink::open(&config.warehouse).expect("open"));

        let error = run_with_source(&config, Arc::new(source), sink.clone())
            .await
            .expect_err("one symbol failed");

        assert_eq!(error.exit_code(), 3);
        assert!(printed_partial(&error));
        assert_eq!(sink.prices_for(&symbol("AAA")).expect("rows").len(), 1);
    }
}
