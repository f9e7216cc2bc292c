//! CLI argument definitions for pse-etl.
//!
//! # Actions
//!
//! | Action | Description |
//! |--------|-------------|
//! | `initdb` | Create the destination schema |
//! | `sync` | Refresh companies, then fetch only missing price days |
//! | `backfill` | Refresh companies, then re-fetch full price history |
//! | `reset` | Delete every stored company and price row |
//!
//! # Examples
//!
//! ```bash
//! pse-etl -a initdb
//! pse-etl -d lake -a backfill -c 8
//! pse-etl -a sync --lookback-days 5 --pretty
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Incremental PSE stock data sync.
#[derive(Debug, Parser)]
#[command(
    name = "pse-etl",
    author,
    version,
    about = "Sync PSE company and daily price data into DuckDB or a parquet lake"
)]
pub struct Cli {
    /// Storage backend to write into.
    #[arg(short, long, value_enum, default_value_t = Destination::Duckdb)]
    pub destination: Destination,

    #[arg(short, long, value_enum, default_value_t = Action::Sync)]
    pub action: Action,

    /// Number of symbols fetched in parallel.
    #[arg(short, long, default_value_t = 1)]
    pub concurrency: usize,

    /// Re-fetch this many days before the latest stored date.
    #[arg(long, default_value_t = 0)]
    pub lookback_days: u32,

    /// Days a symbol may lag behind today before it is considered stale.
    #[arg(long, default_value_t = 1)]
    pub freshness_days: u32,

    /// Which row survives when the source repeats a trading day.
    #[arg(long, value_enum, default_value_t = DedupArg::MaxClose)]
    pub dedup: DedupArg,

    /// Data root. Defaults to $PSE_ETL_HOME, then ~/.pse-etl.
    #[arg(long)]
    pub home: Option<PathBuf>,

    /// DuckDB database file. Defaults to <home>/warehouse.duckdb.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Lake root directory. Defaults to <home>/lake.
    #[arg(long)]
    pub lake_root: Option<PathBuf>,

    /// Per-request timeout for the PSE Edge source.
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    #[arg(long, default_value_t = 4)]
    pub requests_per_second: u32,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Pretty-print the JSON report.
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Destination {
    Duckdb,
    Lake,
}

impl Destination {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duckdb => "duckdb",
            Self::Lake => "lake",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Initdb,
    Backfill,
    Sync,
    Reset,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initdb => "initdb",
            Self::Backfill => "backfill",
            Self::Sync => "sync",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DedupArg {
    MaxClose,
    LastSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
