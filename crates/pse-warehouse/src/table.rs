//! Table layouts and the SQL shared by both sinks.
//!
//! Row values are always bound as parameters; only table and column names,
//! which are compile-time constants, are formatted into statements.

use std::collections::BTreeMap;

use ::duckdb::types::Value;
use ::duckdb::{params_from_iter, Connection, Row};
use pse_core::domain::calendar::{format_iso_date, parse_iso_date};
use pse_core::{Company, PriceRecord, Symbol, UtcDateTime};
use time::Date;

use crate::WarehouseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Double,
    Date,
    Timestamp,
}

impl ColumnType {
    const fn sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
        }
    }

    const fn placeholder(self) -> &'static str {
        match self {
            Self::Text | Self::Double => "?",
            Self::Date => "CAST(? AS DATE)",
            Self::Timestamp => "CAST(? AS TIMESTAMP)",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
}

const fn column(name: &'static str, kind: ColumnType) -> Column {
    Column {
        name,
        kind,
        nullable: false,
    }
}

/// Name, columns, and primary key of one stored table.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub key: &'static [&'static str],
}

pub const COMPANY: TableSpec = TableSpec {
    name: "company",
    columns: &[
        column("symbol", ColumnType::Text),
        column("name", ColumnType::Text),
        column("sector", ColumnType::Text),
        column("subsector", ColumnType::Text),
        Column {
            name: "listing_date",
            kind: ColumnType::Date,
            nullable: true,
        },
        column("extracted_at", ColumnType::Timestamp),
    ],
    key: &["symbol"],
};

pub const DAILY_STOCK_PRICE: TableSpec = TableSpec {
    name: "daily_stock_price",
    columns: &[
        column("symbol", ColumnType::Text),
        column("date", ColumnType::Date),
        column("open", ColumnType::Double),
        column("high", ColumnType::Double),
        column("low", ColumnType::Double),
        column("close", ColumnType::Double),
        column("extracted_at", ColumnType::Timestamp),
    ],
    key: &["symbol", "date"],
};

impl TableSpec {
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn qualified_columns(&self, alias: &str) -> String {
        self.columns
            .iter()
            .map(|column| format!("{alias}.{}", column.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn key_list(&self) -> String {
        self.key.join(", ")
    }

    /// `left.k1 = right.k1 AND ...` over the key columns.
    pub fn key_match(&self, left: &str, right: &str) -> String {
        self.key
            .iter()
            .map(|key| format!("{left}.{key} = {right}.{key}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub fn create_table_sql(&self, table: &str, temporary: bool) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let null = if column.nullable { "" } else { " NOT NULL" };
                format!("{} {}{null}", column.name, column.kind.sql())
            })
            .collect::<Vec<_>>()
            .join(", ");
        let temp = if temporary { "TEMP " } else { "" };
        format!("CREATE OR REPLACE {temp}TABLE {table} ({columns})")
    }

    fn values_clause(&self, rows: usize) -> String {
        let tuple = format!(
            "({})",
            self.columns
                .iter()
                .map(|column| column.kind.placeholder())
                .collect::<Vec<_>>()
                .join(", ")
        );
        vec![tuple; rows].join(", ")
    }

    /// Multi-row insert into `table` with one placeholder tuple per row.
    pub fn insert_sql(&self, table: &str, rows: usize) -> String {
        format!(
            "INSERT INTO {table} ({}) VALUES {}",
            self.column_list(),
            self.values_clause(rows)
        )
    }

    /// Multi-row keyed upsert into this table: non-key columns are overwritten on conflict.
    pub fn upsert_sql(&self, rows: usize) -> String {
        let updates = self
            .columns
            .iter()
            .filter(|column| !self.key.contains(&column.name))
            .map(|column| format!("{0} = excluded.{0}", column.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} ON CONFLICT ({}) DO UPDATE SET {updates}",
            self.insert_sql(self.name, rows),
            self.key_list()
        )
    }
}

/// A domain row that maps onto a [`TableSpec`].
pub trait TableRow: Sized {
    type Key: Ord;

    const TABLE: &'static TableSpec;

    fn key(&self) -> Self::Key;

    /// Values in `TABLE.columns` order.
    fn values(&self) -> Vec<Value>;

    /// Decodes a row selected with `TABLE.column_list()` where dates and
    /// timestamps were cast to VARCHAR.
    fn decode(row: &Row<'_>) -> Result<Self, WarehouseError>;
}

impl TableRow for Company {
    type Key = Symbol;

    const TABLE: &'static TableSpec = &COMPANY;

    fn key(&self) -> Symbol {
        self.symbol.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.symbol.to_string()),
            Value::Text(self.name.clone()),
            Value::Text(self.sector.clone()),
            Value::Text(self.subsector.clone()),
            self.listing_date
                .map_or(Value::Null, |date| Value::Text(format_iso_date(date))),
            Value::Text(self.extracted_at.format_sql()),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self, WarehouseError> {
        let listing_date: Option<String> = row.get(4)?;
        let company = Company::new(
            decode_symbol(row.get(0)?)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            listing_date.as_deref().map(decode_date).transpose()?,
            decode_timestamp(row.get(5)?)?,
        )
        .map_err(|error| WarehouseError::Decode(error.to_string()))?;
        Ok(company)
    }
}

impl TableRow for PriceRecord {
    type Key = (Symbol, Date);

    const TABLE: &'static TableSpec = &DAILY_STOCK_PRICE;

    fn key(&self) -> (Symbol, Date) {
        PriceRecord::key(self)
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.symbol.to_string()),
            Value::Text(format_iso_date(self.date)),
            Value::Double(self.open),
            Value::Double(self.high),
            Value::Double(self.low),
            Value::Double(self.close),
            Value::Text(self.extracted_at.format_sql()),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self, WarehouseError> {
        PriceRecord::new(
            decode_symbol(row.get(0)?)?,
            decode_date(&row.get::<_, String>(1)?)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            decode_timestamp(row.get(6)?)?,
        )
        .map_err(|error| WarehouseError::Decode(error.to_string()))
    }
}

fn decode_symbol(value: String) -> Result<Symbol, WarehouseError> {
    Symbol::parse(&value).map_err(|error| WarehouseError::Decode(format!("{value}: {error}")))
}

fn decode_date(value: &str) -> Result<Date, WarehouseError> {
    parse_iso_date(value).map_err(|error| WarehouseError::Decode(error.to_string()))
}

fn decode_timestamp(value: String) -> Result<UtcDateTime, WarehouseError> {
    UtcDateTime::parse_sql(&value).map_err(|error| WarehouseError::Decode(error.to_string()))
}

/// Collapses rows sharing a key; the last one wins. Output is in key order.
pub fn last_wins<R: TableRow>(rows: &[R]) -> Vec<&R> {
    let mut by_key = BTreeMap::new();
    for row in rows {
        by_key.insert(row.key(), row);
    }
    by_key.into_values().collect()
}

/// Inserts `rows` with `sql_for(chunk_len)` in chunks of at most `max_rows`.
pub fn execute_chunked<R: TableRow>(
    connection: &Connection,
    rows: &[&R],
    max_rows: usize,
    sql_for: impl Fn(usize) -> String,
) -> Result<usize, WarehouseError> {
    let mut written = 0;
    for chunk in rows.chunks(max_rows.max(1)) {
        let sql = sql_for(chunk.len());
        let mut statement = connection.prepare_cached(&sql)?;
        let values = chunk.iter().flat_map(|row| row.values());
        written += statement.execute(params_from_iter(values))?;
        tracing::debug!(table = R::TABLE.name, rows = chunk.len(), "wrote chunk");
    }
    Ok(written)
}

/// `SELECT` list for [`TableRow::decode`], dates and timestamps cast to VARCHAR.
pub fn decode_select_list(spec: &TableSpec) -> String {
    spec.columns
        .iter()
        .map(|column| match column.kind {
            ColumnType::Date | ColumnType::Timestamp => {
                format!("CAST({0} AS VARCHAR) AS {0}", column.name)
            }
            ColumnType::Text | ColumnType::Double => column.name.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads every row of `source` (a table name or table function) ordered by key.
pub fn read_rows<R: TableRow>(
    connection: &Connection,
    source: &str,
    filter: Option<(&str, &Symbol)>,
) -> Result<Vec<R>, WarehouseError> {
    let mut sql = format!("SELECT {} FROM {source}", decode_select_list(R::TABLE));
    if let Some((column, _)) = filter {
        sql.push_str(&format!(" WHERE {column} = ?"));
    }
    sql.push_str(&format!(" ORDER BY {}", R::TABLE.key_list()));

    let mut statement = connection.prepare(&sql)?;
    let params: Vec<Value> = filter
        .map(|(_, symbol)| Value::Text(symbol.to_string()))
        .into_iter()
        .collect();
    let mut rows = statement.query(params_from_iter(params))?;

    let mut decoded = Vec::new();
    while let Some(row) = rows.next()? {
        decoded.push(R::decode(row)?);
    }
    Ok(decoded)
}

/// `max(date)` per requested symbol from a price `source`, in chunks of `max_rows` symbols.
pub fn latest_dates(
    connection: &Connection,
    source: &str,
    symbols: &[Symbol],
    max_rows: usize,
) -> Result<BTreeMap<Symbol, Date>, WarehouseError> {
    let mut latest = BTreeMap::new();
    for chunk in symbols.chunks(max_rows.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT symbol, CAST(MAX(date) AS VARCHAR) FROM {source} \
             WHERE symbol IN ({placeholders}) GROUP BY symbol"
        );
        let mut statement = connection.prepare(&sql)?;
        let params = chunk.iter().map(|symbol| Value::Text(symbol.to_string()));
        let mut rows = statement.query(params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            let symbol = decode_symbol(row.get(0)?)?;
            let date = decode_date(&row.get::<_, String>(1)?)?;
            latest.insert(symbol, date);
        }
    }
    Ok(latest)
}
