//! End-to-end ETL job: registry, then prices, then a freshness refresh.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::freshness::{FreshnessSummary, FreshnessTracker};
use crate::registry::{RegistryError, RegistryReport, RegistrySync};
use crate::scheduler::{SyncEngine, SyncError, SyncReport};
use crate::sink::{Sink, SinkError};
use crate::window::SyncParams;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Sync,
    Backfill,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub mode: JobMode,
    pub destination: &'static str,
    pub registry: RegistryReport,
    pub prices: SyncReport,
    /// Freshness after the price write phase; absent when the refresh failed.
    pub freshness: Option<FreshnessSummary>,
}

impl JobReport {
    pub fn to_json(&self, pretty: bool) -> Result<String, CoreError> {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(rendered)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The price phase ran but did not fully succeed.
    #[error("price sync failed: {source}")]
    Prices {
        partial: Box<Option<JobReport>>,
        source: SyncError,
    },

    #[error("freshness refresh failed: {0}")]
    Freshness(#[source] SinkError),
}

impl JobError {
    /// Whatever report the job produced before it failed.
    pub fn partial_report(&self) -> Option<&JobReport> {
        match self {
            Self::Prices { partial, .. } => partial.as_ref().as_ref(),
            Self::Registry(_) | Self::Freshness(_) => None,
        }
    }
}

/// Wires registry sync, the scheduler, and the freshness tracker for one sink.
pub struct SyncJob {
    registry: RegistrySync,
    engine: SyncEngine,
    tracker: FreshnessTracker,
    sink: Arc<dyn Sink>,
}

impl SyncJob {
    pub fn new(registry: RegistrySync, engine: SyncEngine, sink: Arc<dyn Sink>) -> Self {
        Self {
            registry,
            engine,
            tracker: FreshnessTracker::new(Arc::clone(&sink)),
            sink,
        }
    }

    pub async fn run(&self, mode: JobMode, params: SyncParams) -> Result<JobReport, JobError> {
        info!(?mode, destination = self.sink.name(), "starting job");
        let registry = self.registry.sync_registry().await?;

        let prices = match mode {
            JobMode::Sync => self.engine.sync(&registry.symbols, params).await,
            JobMode::Backfill => self.engine.backfill(&registry.symbols, params).await,
        };

        let freshness = self
            .tracker
            .refresh(registry.symbols.clone())
            .await
            .map(|map| map.summary(registry.symbols.len()));

        match prices {
            Ok(prices) => {
                let freshness = freshness.map_err(JobError::Freshness)?;
                info!(
                    destination = self.sink.name(),
                    never_synced = freshness.never_synced,
                    "job finished"
                );
                Ok(JobReport {
                    mode,
                    destination: self.sink.name(),
                    registry,
                    prices,
                    freshness: Some(freshness),
                })
            }
            Err(source) => {
                if let Err(error) = &freshness {
                    warn!(%error, "freshness refresh after failed price sync also failed");
                }
                let partial = source.report().cloned().map(|prices| JobReport {
                    mode,
                    destination: self.sink.name(),
                    registry,
                    prices,
                    freshness: freshness.ok(),
                });
                Err(JobError::Prices {
                    partial: Box::new(partial),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;
    use crate::adapters::ScriptedSource;
    use crate::clock::FixedClock;
    use crate::memory::MemorySink;
    use crate::{Company, PriceRecord, Symbol, UtcDateTime};

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("symbol")
    }

    fn extracted_at() -> UtcDateTime {
        UtcDateTime::parse("2024-01-12T02:00:00Z").expect("timestamp")
    }

    fn company(value: &str) -> Company {
        Company::new(symbol(value), format!("{value} Corp"), "Industrial", "Services", None, extracted_at())
            .expect("company")
    }

    fn price(value: &str, close: f64) -> PriceRecord {
        PriceRecord::new(symbol(value), date!(2024 - 01 - 11), close, close, close, close, extracted_at())
            .expect("record")
    }

    fn job(source: ScriptedSource, sink: Arc<MemorySink>) -> SyncJob {
        let source = Arc::new(source);
        let sink: Arc<dyn Sink> = sink;
        let engine = SyncEngine::new(source.clone(), Arc::clone(&sink))
            .with_clock(Arc::new(FixedClock::new(datetime!(2024-01-12 10:00 +8))));
        SyncJob::new(RegistrySync::new(source, Arc::clone(&sink)), engine, sink)
    }

    #[tokio::test]
    async fn syncs_registry_then_prices() {
        let source = ScriptedSource::new()
            .with_company(company("AAA"))
            .with_company(company("BBB"))
            .with_prices(vec![price("AAA", 10.0)]);
        let sink = Arc::new(MemorySink::new());

        let report = job(source, Arc::clone(&sink))
            .run(JobMode::Sync, SyncParams::default())
            .await
            .expect("job");

        assert_eq!(report.registry.written, 2);
        assert_eq!(report.prices.rows_written, 1);
        let freshness = report.freshness.as_ref().expect("freshness");
        assert_eq!(freshness.tracked, 2);
        assert_eq!(freshness.never_synced, 1);
        assert_eq!(sink.companies().len(), 2);

        let json = report.to_json(false).expect("json");
        assert!(json.contains(r#""mode":"sync""#));
    }

    #[tokio::test]
    async fn failed_symbol_keeps_a_partial_report() {
        let source = ScriptedSource::new()
            .with_company(company("AAA"))
            .with_company(company("BAD"))
            .with_prices(vec![price("AAA", 10.0)])
            .with_failure(symbol("BAD"), "timeout");
        let sink = Arc::new(MemorySink::new());

        let err = job(source, Arc::clone(&sink))
            .run(JobMode::Sync, SyncParams::default())
            .await
            .expect_err("BAD fails");

        let partial = err.partial_report().expect("partial report");
        assert_eq!(partial.prices.failed, 1);
        assert_eq!(partial.prices.rows_written, 1);
        assert_eq!(sink.prices().len(), 1);
    }

    #[tokio::test]
    async fn registry_failure_stops_before_prices() {
        let source = ScriptedSource::new()
            .with_listing_failure("directory down")
            .with_prices(vec![price("AAA", 10.0)]);
        let sink = Arc::new(MemorySink::new());

        let err = job(source, Arc::clone(&sink))
            .run(JobMode::Backfill, SyncParams::default())
            .await
            .expect_err("registry failure");

        assert!(matches!(err, JobError::Registry(_)));
        assert!(err.partial_report().is_none());
        assert!(sink.prices().is_empty());
    }
}
