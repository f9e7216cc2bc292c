//! Storage sink contract.
//!
//! Sinks are blocking; async callers go through [`run_blocking`] so writes
//! never stall the runtime's worker threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::Date;

use crate::{Company, PriceRecord, Symbol};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    /// Writing or merging a staged batch failed. The stage has already been discarded.
    #[error("staged merge failed: {0}")]
    Staging(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl SinkError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }
}

/// When fetched price rows are merged into the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Each worker merges its own symbol right after fetching.
    #[default]
    PerSymbol,
    /// Rows are collected and merged once after every symbol was fetched.
    Deferred,
}

/// A keyed store for companies and daily prices.
///
/// Every upsert call is atomic with respect to other calls on the same sink:
/// conflicting keys are overwritten in full and a failed call leaves no partial state.
pub trait Sink: Send + Sync {
    /// Short backend name used in logs and reports.
    fn name(&self) -> &'static str;

    fn merge_strategy(&self) -> MergeStrategy {
        MergeStrategy::PerSymbol
    }

    /// Creates the schema if it does not exist. Idempotent.
    fn initialize(&self) -> Result<(), SinkError>;

    /// Removes every stored company and price row.
    fn reset(&self) -> Result<(), SinkError>;

    /// Upserts companies keyed by symbol; returns the number of rows written.
    fn upsert_companies(&self, rows: &[Company]) -> Result<usize, SinkError>;

    /// Upserts prices keyed by `(symbol, date)`; returns the number of rows written.
    fn upsert_prices(&self, rows: &[PriceRecord]) -> Result<usize, SinkError>;

    /// `max(date)` per symbol, restricted to `symbols`. Symbols without rows are absent.
    fn latest_dates(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, Date>, SinkError>;
}

/// Runs a blocking sink call on the blocking thread pool.
pub async fn run_blocking<T, F>(sink: Arc<dyn Sink>, call: F) -> Result<T, SinkError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Sink) -> Result<T, SinkError> + Send + 'static,
{
    let backend = sink.name();
    tokio::task::spawn_blocking(move || call(sink.as_ref()))
        .await
        .map_err(|error| SinkError::backend(backend, format!("blocking task failed: {error}")))?
}
