//! Parquet lake sink.
//!
//! ```text
//! <root>/company/data.parquet
//! <root>/daily_stock_price/data.parquet
//! <root>/_staging/<table>-<uuid>/part-0.parquet   (only while a merge runs)
//! ```
//!
//! An upsert stages its rows as parquet, then rewrites the table file as
//! "stored rows without a staged key" plus "staged rows" into a temp file that
//! is renamed over the data file. The staging directory is removed whether or
//! not the merge succeeded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ::duckdb::Connection;
use pse_core::{Company, MergeStrategy, PriceRecord, Sink, SinkError, Symbol};
use time::Date;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::table::{self, TableRow, TableSpec, COMPANY, DAILY_STOCK_PRICE};
use crate::{sql_path_literal, WarehouseError, DEFAULT_MAX_ROWS_PER_STATEMENT};

const LAKE_BACKEND: &str = "lake";
const DATA_FILE: &str = "data.parquet";
const STAGING_DIR: &str = "_staging";
const STAGE_TABLE: &str = "stage_rows";

#[derive(Debug, Clone)]
pub struct LakeConfig {
    pub root: PathBuf,
    pub max_rows_per_statement: usize,
}

impl LakeConfig {
    pub fn under_home(home: impl AsRef<Path>) -> Self {
        Self {
            root: home.as_ref().join("lake"),
            max_rows_per_statement: DEFAULT_MAX_ROWS_PER_STATEMENT,
        }
    }
}

/// Table-format lake on the local filesystem, queried through an in-memory DuckDB engine.
pub struct LakeSink {
    config: LakeConfig,
    /// One engine connection; holding its lock serializes merges.
    engine: Mutex<Connection>,
}

/// Removes the staging directory on drop.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(root: &Path, table: &str) -> Result<Self, WarehouseError> {
        let path = root
            .join(STAGING_DIR)
            .join(format!("{table}-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn part_file(&self) -> PathBuf {
        self.path.join("part-0.parquet")
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staging directory"),
            Err(error) => warn!(path = %self.path.display(), %error, "failed to remove staging directory"),
        }
    }
}

impl LakeSink {
    pub fn open(config: LakeConfig) -> Result<Self, WarehouseError> {
        fs::create_dir_all(&config.root)?;
        let engine = Connection::open_in_memory()?;
        // parquet is linked in; never reach out to the extension repository.
        engine.execute_batch("PRAGMA disable_progress_bar; SET autoinstall_known_extensions = false;")?;
        Ok(Self {
            config,
            engine: Mutex::new(engine),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn data_file(&self, spec: &TableSpec) -> PathBuf {
        self.config.root.join(spec.name).join(DATA_FILE)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.config.root.join(STAGING_DIR)
    }

    pub fn companies(&self) -> Result<Vec<Company>, WarehouseError> {
        self.read_table(None)
    }

    pub fn prices_for(&self, symbol: &Symbol) -> Result<Vec<PriceRecord>, WarehouseError> {
        self.read_table(Some(("symbol", symbol)))
    }

    pub fn prices(&self) -> Result<Vec<PriceRecord>, WarehouseError> {
        self.read_table(None)
    }

    fn engine(&self) -> Result<MutexGuard<'_, Connection>, WarehouseError> {
        self.engine
            .lock()
            .map_err(|_| WarehouseError::Poisoned("lake engine"))
    }

    fn read_table<R: TableRow>(&self, filter: Option<(&str, &Symbol)>) -> Result<Vec<R>, WarehouseError> {
        let data = self.data_file(R::TABLE);
        if !data.exists() {
            return Ok(Vec::new());
        }
        let engine = self.engine()?;
        table::read_rows(&engine, &read_parquet(&data), filter)
    }

    fn upsert<R: TableRow>(&self, rows: &[R]) -> Result<usize, WarehouseError> {
        let rows = table::last_wins(rows);
        if rows.is_empty() {
            return Ok(0);
        }

        let engine = self.engine()?;
        let spec = R::TABLE;
        let stage = StagingDir::create(&self.config.root, spec.name)?;
        let staged = self
            .write_stage(&engine, &rows, &stage)
            .and_then(|()| self.merge_stage(&engine, spec, &stage))
            .map_err(|error| WarehouseError::Staging {
                table: spec.name,
                message: error.to_string(),
            })?;

        info!(table = spec.name, rows = staged, "merged staged rows into lake table");
        Ok(staged)
    }

    fn write_stage<R: TableRow>(
        &self,
        engine: &Connection,
        rows: &[&R],
        stage: &StagingDir,
    ) -> Result<(), WarehouseError> {
        let spec = R::TABLE;
        engine.execute_batch(&spec.create_table_sql(STAGE_TABLE, true))?;
        let result = table::execute_chunked(engine, rows, self.config.max_rows_per_statement, |len| {
            spec.insert_sql(STAGE_TABLE, len)
        })
        .and_then(|_| {
            engine.execute_batch(&format!(
                "COPY {STAGE_TABLE} TO {} (FORMAT PARQUET)",
                sql_path_literal(&stage.part_file())
            ))?;
            Ok(())
        });
        if let Err(error) = engine.execute_batch(&format!("DROP TABLE IF EXISTS {STAGE_TABLE}")) {
            warn!(table = spec.name, %error, "failed to drop stage table");
        }
        debug!(table = spec.name, rows = rows.len(), path = %stage.path.display(), "staged rows");
        result
    }

    fn merge_stage(&self, engine: &Connection, spec: &TableSpec, stage: &StagingDir) -> Result<usize, WarehouseError> {
        let data = self.data_file(spec);
        let part = read_parquet(&stage.part_file());
        let merged_rows = if data.exists() {
            format!(
                "SELECT {target_cols} FROM {target} t \
                 WHERE NOT EXISTS (SELECT 1 FROM {part} s WHERE {matches}) \
                 UNION ALL SELECT {cols} FROM {part}",
                target_cols = spec.qualified_columns("t"),
                target = read_parquet(&data),
                matches = spec.key_match("t", "s"),
                cols = spec.column_list(),
            )
        } else {
            format!("SELECT {} FROM {part}", spec.column_list())
        };

        let table_dir = self.config.root.join(spec.name);
        fs::create_dir_all(&table_dir)?;
        let tmp = table_dir.join(format!("{DATA_FILE}.{}.tmp", Uuid::new_v4()));
        let result = engine
            .execute_batch(&format!(
                "COPY ({merged_rows} ORDER BY {keys}) TO {tmp} (FORMAT PARQUET)",
                keys = spec.key_list(),
                tmp = sql_path_literal(&tmp),
            ))
            .map_err(WarehouseError::from)
            .and_then(|()| {
                let staged: i64 = engine.query_row(&format!("SELECT COUNT(*) FROM {part}"), [], |row| row.get(0))?;
                fs::rename(&tmp, &data)?;
                Ok(usize::try_from(staged).unwrap_or_default())
            });

        if result.is_err() && tmp.exists() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn reset_tables(&self) -> Result<(), WarehouseError> {
        let _engine = self.engine()?;
        for dir in [
            self.config.root.join(COMPANY.name),
            self.config.root.join(DAILY_STOCK_PRICE.name),
            self.staging_root(),
        ] {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        info!(root = %self.config.root.display(), "cleared lake tables");
        Ok(())
    }

    fn latest(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, Date>, WarehouseError> {
        let data = self.data_file(&DAILY_STOCK_PRICE);
        if symbols.is_empty() || !data.exists() {
            return Ok(BTreeMap::new());
        }
        let engine = self.engine()?;
        table::latest_dates(&engine, &read_parquet(&data), symbols, self.config.max_rows_per_statement)
    }
}

fn read_parquet(path: &Path) -> String {
    format!("read_parquet({})", sql_path_literal(path))
}

impl Sink for LakeSink {
    fn name(&self) -> &'static str {
        LAKE_BACKEND
    }

    fn merge_strategy(&self) -> MergeStrategy {
        MergeStrategy::Deferred
    }

    fn initialize(&self) -> Result<(), SinkError> {
        [COMPANY.name, DAILY_STOCK_PRICE.name]
            .into_iter()
            .try_for_each(|table| fs::create_dir_all(self.config.root.join(table)))
            .map_err(|error| WarehouseError::from(error).into_sink_error(LAKE_BACKEND))
    }

    fn reset(&self) -> Result<(), SinkError> {
        self.reset_tables()
            .map_err(|error| error.into_sink_error(LAKE_BACKEND))
    }

    fn upsert_companies(&self, rows: &[Company]) -> Result<usize, SinkError> {
        self.upsert(rows)
            .map_err(|error| error.into_sink_error(LAKE_BACKEND))
    }

    fn upsert_prices(&self, rows: &[PriceRecord]) -> Result<usize, SinkError> {
        self.upsert(rows)
            .map_err(|error| error.into_sink_error(LAKE_BACKEND))
    }

    fn latest_dates(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, Date>, SinkError> {
        self.latest(symbols)
            .map_err(|error| error.into_sink_error(LAKE_BACKEND))
    }
}

#[cfg(test)]
mod tests {
    use pse_core::UtcDateTime;
    use tempfile::tempdir;
    use time::macros::date;

    use super::*;

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("symbol")
    }

    fn price(value: &str, date: Date, close: f64) -> PriceRecord {
        PriceRecord::new(
            symbol(value),
            date,
            close,
            close,
            close,
            close,
            UtcDateTime::parse("2024-01-12T02:00:00Z").expect("timestamp"),
        )
        .expect("record")
    }

    fn lake(root: &Path) -> LakeSink {
        let sink = LakeSink::open(LakeConfig {
            root: root.to_path_buf(),
            max_rows_per_statement: 2,
        })
        .expect("lake");
        sink.initialize().expect("initialize");
        sink
    }

    fn staging_entries(sink: &LakeSink) -> usize {
        fs::read_dir(sink.staging_root())
            .map(|entries| entries.count())
            .unwrap_or_default()
    }

    #[test]
    fn parquet_support_is_linked_in() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());

        let engine = sink.engine().expect("engine");
        let loaded: bool = engine
            .query_row(
                "SELECT loaded FROM duckdb_extensions() WHERE extension_name = 'parquet'",
                [],
                |row| row.get(0),
            )
            .expect("parquet extension row");
        assert!(loaded);

        let install: String = engine
            .query_row("SELECT current_setting('autoinstall_known_extensions')::VARCHAR", [], |row| {
                row.get(0)
            })
            .expect("setting");
        assert_eq!(install, "false");
    }

    #[test]
    fn missing_table_reads_as_empty() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());

        assert!(sink.prices().expect("prices").is_empty());
        assert!(sink.latest_dates(&[symbol("AAA")]).expect("latest").is_empty());
    }

    #[test]
    fn merge_updates_matches_and_inserts_the_rest() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());

        sink.upsert_prices(&[
            price("AAA", date!(2024 - 01 - 01), 10.0),
            price("AAA", date!(2024 - 01 - 02), 11.0),
            price("BBB", date!(2024 - 01 - 01), 5.0),
        ])
        .expect("first merge");
        sink.upsert_prices(&[
            price("AAA", date!(2024 - 01 - 01), 15.0),
            price("AAA", date!(2024 - 01 - 03), 12.0),
        ])
        .expect("second merge");

        let aaa = sink.prices_for(&symbol("AAA")).expect("read");
        let closes: Vec<f64> = aaa.iter().map(|row| row.close).collect();
        assert_eq!(closes, [15.0, 11.0, 12.0]);
        assert_eq!(sink.prices().expect("all").len(), 4);
        assert_eq!(staging_entries(&sink), 0);
    }

    #[test]
    fn failed_merge_removes_stage_and_keeps_data() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());
        let data = sink.data_file(&DAILY_STOCK_PRICE);
        fs::write(&data, b"not a parquet file").expect("corrupt data file");

        let err = sink
            .upsert_prices(&[price("AAA", date!(2024 - 01 - 01), 10.0)])
            .expect_err("merge must fail");

        assert!(matches!(err, SinkError::Staging(_)));
        assert_eq!(staging_entries(&sink), 0);
        assert_eq!(fs::read(&data).expect("data"), b"not a parquet file");
        let leftovers = fs::read_dir(data.parent().expect("table dir"))
            .expect("table dir")
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn companies_round_trip() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());
        let company = Company::new(
            symbol("ALI"),
            "Ayala Land, Inc.",
            "Property",
            "Property",
            Some(date!(1991 - 07 - 05)),
            UtcDateTime::parse("2024-01-12T02:00:00Z").expect("timestamp"),
        )
        .expect("company");

        sink.upsert_companies(&[company.clone()]).expect("upsert");
        assert_eq!(sink.companies().expect("read"), vec![company]);
    }

    #[test]
    fn reset_removes_table_files() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());
        sink.upsert_prices(&[price("AAA", date!(2024 - 01 - 01), 10.0)])
            .expect("upsert");

        sink.reset().expect("reset");

        assert!(!sink.data_file(&DAILY_STOCK_PRICE).exists());
        assert!(sink.prices().expect("read").is_empty());
    }

    #[test]
    fn latest_dates_reads_the_merged_file() {
        let temp = tempdir().expect("tempdir");
        let sink = lake(temp.path());
        sink.upsert_prices(&[
            price("AAA", date!(2024 - 01 - 01), 1.0),
            price("AAA", date!(2024 - 01 - 05), 1.0),
        ])
        .expect("upsert");

        let latest = sink.latest_dates(&[symbol("AAA"), symbol("BBB")]).expect("latest");
        assert_eq!(latest.get(&symbol("AAA")), Some(&date!(2024 - 01 - 05)));
        assert_eq!(latest.len(), 1);
    }
}
