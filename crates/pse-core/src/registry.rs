//! Company directory refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::data_source::{SourceError, StockSource};
use crate::sink::{run_blocking, Sink, SinkError};
use crate::{Company, Symbol};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Nothing was written.
    #[error("company listing failed: {0}")]
    Source(#[from] SourceError),

    #[error("company upsert failed: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryReport {
    /// Rows in the source listing, duplicates included.
    pub listed: usize,
    pub duplicates: usize,
    pub written: usize,
    /// Sorted, unique symbols of this run's listing.
    pub symbols: Vec<Symbol>,
}

/// Mirrors the source's company directory into the sink.
///
/// Companies missing from the listing are left in place.
#[derive(Clone)]
pub struct RegistrySync {
    source: Arc<dyn StockSource>,
    sink: Arc<dyn Sink>,
}

impl RegistrySync {
    pub fn new(source: Arc<dyn StockSource>, sink: Arc<dyn Sink>) -> Self {
        Self { source, sink }
    }

    pub async fn sync_registry(&self) -> Result<RegistryReport, RegistryError> {
        let companies = self.source.list_companies().await?;
        let listed = companies.len();

        // Later rows for the same symbol replace earlier ones.
        let mut by_symbol: BTreeMap<Symbol, Company> = BTreeMap::new();
        for company in companies {
            by_symbol.insert(company.symbol.clone(), company);
        }
        let duplicates = listed - by_symbol.len();
        if duplicates > 0 {
            warn!(source = self.source.id(), duplicates, "listing repeated some symbols");
        }

        let symbols: Vec<Symbol> = by_symbol.keys().cloned().collect();
        let rows: Vec<Company> = by_symbol.into_values().collect();
        let written = run_blocking(Arc::clone(&self.sink), move |sink| {
            sink.upsert_companies(&rows)
        })
        .await?;

        info!(
            source = self.source.id(),
            sink = self.sink.name(),
            listed,
            written,
            "company registry refreshed"
        );

        Ok(RegistryReport {
            listed,
            duplicates,
            written,
            symbols,
        })
    }
}
