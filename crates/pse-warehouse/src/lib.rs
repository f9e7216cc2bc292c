//! # pse-warehouse
//!
//! Storage sinks for pse-etl.
//!
//! | Sink | Layout | Merge |
//! |------|--------|-------|
//! | [`DuckDbSink`] | one DuckDB database file | keyed `INSERT ... ON CONFLICT DO UPDATE`, per symbol |
//! | [`LakeSink`] | one parquet file per table under a root directory | stage-then-merge, once per run |
//!
//! ## Tables
//!
//! | Table | Key | Description |
//! |-------|-----|-------------|
//! | `company` | `symbol` | Company directory |
//! | `daily_stock_price` | `(symbol, date)` | Daily OHLC prices |
//!
//! All row values are bound as statement parameters.

pub mod duckdb;
pub mod lake;
pub mod migrations;
pub mod table;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use pse_core::{Company, PriceRecord, Sink, SinkError, Symbol};
use thiserror::Error;
use time::Date;
use tracing::{debug, info};

pub use self::duckdb::{ConnectionPool, DbLocation, PooledConnection};
pub use lake::{LakeConfig, LakeSink};
use table::{TableRow, COMPANY, DAILY_STOCK_PRICE};

pub const DEFAULT_MAX_ROWS_PER_STATEMENT: usize = 1_000;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored value could not be turned back into a domain row.
    #[error("cannot decode stored row: {0}")]
    Decode(String),

    /// Writing or merging a staged batch failed; the stage was removed.
    #[error("staged merge into {table} failed: {message}")]
    Staging { table: &'static str, message: String },

    #[error("{0} mutex poisoned")]
    Poisoned(&'static str),
}

impl WarehouseError {
    pub fn into_sink_error(self, backend: &'static str) -> SinkError {
        match self {
            Self::Staging { .. } => SinkError::Staging(self.to_string()),
            Self::Decode(message) => SinkError::InvalidData(message),
            other => SinkError::backend(backend, other.to_string()),
        }
    }
}

/// Configuration for the DuckDB sink.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for pse-etl data.
    pub home: PathBuf,
    pub db_path: PathBuf,
    /// Connections kept open between calls.
    pub max_pool_size: usize,
    /// Upper bound on rows bound into one statement.
    pub max_rows_per_statement: usize,
}

impl WarehouseConfig {
    pub fn under_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            db_path: home.join("warehouse.duckdb"),
            home,
            max_pool_size: 4,
            max_rows_per_statement: DEFAULT_MAX_ROWS_PER_STATEMENT,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::under_home(resolve_home())
    }
}

/// Relational sink over a pooled DuckDB database.
#[derive(Clone)]
pub struct DuckDbSink {
    pool: ConnectionPool,
    max_rows_per_statement: usize,
}

const DUCKDB_BACKEND: &str = "duckdb";

impl DuckDbSink {
    pub fn open(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(DbLocation::File(config.db_path.clone()), config.max_pool_size)?;
        debug!(path = %config.db_path.display(), "opened duckdb warehouse");
        Ok(Self {
            pool,
            max_rows_per_statement: config.max_rows_per_statement.max(1),
        })
    }

    pub fn open_in_memory(max_rows_per_statement: usize) -> Result<Self, WarehouseError> {
        Ok(Self {
            pool: ConnectionPool::open(DbLocation::InMemory, 2)?,
            max_rows_per_statement: max_rows_per_statement.max(1),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.pool.db_path()
    }

    pub fn apply_migrations(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn companies(&self) -> Result<Vec<Company>, WarehouseError> {
        let connection = self.pool.acquire()?;
        table::read_rows(&connection, COMPANY.name, None)
    }

    pub fn prices_for(&self, symbol: &Symbol) -> Result<Vec<PriceRecord>, WarehouseError> {
        let connection = self.pool.acquire()?;
        table::read_rows(&connection, DAILY_STOCK_PRICE.name, Some(("symbol", symbol)))
    }

    pub fn price_count(&self) -> Result<usize, WarehouseError> {
        let connection = self.pool.acquire()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM daily_stock_price", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn upsert<R: TableRow>(&self, rows: &[R]) -> Result<usize, WarehouseError> {
        let rows = table::last_wins(rows);
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = table::execute_chunked(&connection, &rows, self.max_rows_per_statement, |len| {
            R::TABLE.upsert_sql(len)
        });
        let written = finalize_transaction(&connection, result)?;
        debug!(table = R::TABLE.name, written, "upserted rows");
        Ok(written)
    }

    fn reset_tables(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = connection
            .execute_batch("DELETE FROM daily_stock_price; DELETE FROM company;")
            .map_err(WarehouseError::from);
        finalize_transaction(&connection, result)?;
        info!(backend = DUCKDB_BACKEND, "cleared company and price tables");
        Ok(())
    }

    fn latest(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, Date>, WarehouseError> {
        if symbols.is_empty() {
            return Ok(BTreeMap::new());
        }
        let connection = self.pool.acquire()?;
        table::latest_dates(&connection, DAILY_STOCK_PRICE.name, symbols, self.max_rows_per_statement)
    }
}

impl Sink for DuckDbSink {
    fn name(&self) -> &'static str {
        DUCKDB_BACKEND
    }

    fn initialize(&self) -> Result<(), SinkError> {
        self.apply_migrations()
            .map_err(|error| error.into_sink_error(DUCKDB_BACKEND))
    }

    fn reset(&self) -> Result<(), SinkError> {
        self.reset_tables()
            .map_err(|error| error.into_sink_error(DUCKDB_BACKEND))
    }

    fn upsert_companies(&self, rows: &[Company]) -> Result<usize, SinkError> {
        self.upsert(rows)
            .map_err(|error| error.into_sink_error(DUCKDB_BACKEND))
    }

    fn upsert_prices(&self, rows: &[PriceRecord]) -> Result<usize, SinkError> {
        self.upsert(rows)
            .map_err(|error| error.into_sink_error(DUCKDB_BACKEND))
    }

    fn latest_dates(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, Date>, SinkError> {
        self.latest(symbols)
            .map_err(|error| error.into_sink_error(DUCKDB_BACKEND))
    }
}

/// Commits on success, rolls back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// `PSE_ETL_HOME`, else `~/.pse-etl`, else `./.pse-etl`.
pub fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("PSE_ETL_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".pse-etl");
    }

    PathBuf::from(".pse-etl")
}

/// Convert a path to a SQL-compatible string (forward slashes).
fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Quotes an internal file path as a SQL string literal.
///
/// Only for paths this crate builds itself; row data is always bound.
fn sql_path_literal(path: &Path) -> String {
    format!("'{}'", escape_sql_string(&path_to_sql(path)))
}

fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
