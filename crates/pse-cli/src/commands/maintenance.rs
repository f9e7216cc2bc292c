use std::sync::Arc;

use pse_core::sink::run_blocking;
use pse_core::Sink;
use serde_json::json;
use tracing::info;

use crate::config::RunConfig;
use crate::error::CliError;
use crate::output::Envelope;

pub async fn initdb(config: &RunConfig, sink: Arc<dyn Sink>) -> Result<Envelope, CliError> {
    run_blocking(Arc::clone(&sink), |sink| sink.initialize()).await?;
    let path = config.destination_path();
    info!(destination = sink.name(), path = %path.display(), "schema ready");

    Ok(Envelope::ok(
        config.action.as_str(),
        sink.name(),
        json!({ "path": path.display().to_string() }),
    ))
}

/// Deletes stored rows. The schema survives so a later sync needs no initdb.
pub async fn reset(config: &RunConfig, sink: Arc<dyn Sink>) -> Result<Envelope, CliError> {
    run_blocking(Arc::clone(&sink), |sink| sink.reset()).await?;
    let path = config.destination_path();
    info!(destination = sink.name(), path = %path.display(), "destination reset");

    Ok(Envelope::ok(
        config.action.as_str(),
        sink.name(),
        json!({ "path": path.display().to_string() }),
    ))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pse_core::{PriceRecord, Symbol};
    use pse_warehouse::DuckDbSink;
    use tempfile::tempdir;
    use time::macros::date;

    use super::*;
    use crate::cli::Cli;
    use crate::commands::open_sink;

    fn config_for(home: &std::path::Path, args: &[&str]) -> RunConfig {
        let home = home.to_string_lossy().into_owned();
        let argv = ["pse-etl", "--home", home.as_str()]
            .into_iter()
            .chain(args.iter().copied());
        RunConfig::from_cli(&Cli::try_parse_from(argv).expect("parse")).expect("config")
    }

    #[tokio::test]
    async fn initdb_creates_duckdb_file_under_home() {
        let temp = tempdir().expect("tempdir");
        let config = config_for(temp.path(), &["-a", "initdb"]);

        let envelope = initdb(&config, open_sink(&config).expect("sink")).await.expect("initdb");

        assert!(envelope.ok);
        assert_eq!(envelope.destination, "duckdb");
        assert!(temp.path().join("warehouse.duckdb").exists());
    }

    #[tokio::test]
    async fn reset_empties_duckdb_tables() {
        let temp = tempdir().expect("tempdir");
        let config = config_for(temp.path(), &["-a", "reset"]);
        {
            let sink = DuckDbSink::open(&config.warehouse).expect("open");
            sink.apply_migrations().expect("migrate");
            let row = PriceRecord::new(
                Symbol::parse("AAA").expect("symbol"),
                date!(2024 - 01 - 02),
                1.0,
                1.0,
                1.0,
                1.0,
                pse_core::UtcDateTime::parse("2024-01-02T08:00:00Z").expect("ts"),
            )
            .expect("row");
            sink.upsert_prices(&[row]).expect("upsert");
        }

        reset(&config, open_sink(&config).expect("sink")).await.expect("reset");

        let sink = DuckDbSink::open(&config.warehouse).expect("reopen");
        assert_eq!(sink.price_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn initdb_lake_creates_table_directories() {
        let temp = tempdir().expect("tempdir");
        let config = config_for(temp.path(), &["-d", "lake", "-a", "initdb"]);

        initdb(&config, open_sink(&config).expect("sink")).await.expect("initdb");

        assert!(temp.path().join("lake").join("company").is_dir());
        assert!(temp.path().join("lake").join("daily_stock_price").is_dir());
    }
}
