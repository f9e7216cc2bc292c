//! Per-symbol "latest stored date" lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use time::Date;

use crate::domain::calendar::EPOCH_FLOOR;
use crate::sink::{run_blocking, Sink, SinkError};
use crate::Symbol;

/// Latest stored date per symbol for one run. Absent symbols have never been synced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessMap(BTreeMap<Symbol, Date>);

impl FreshnessMap {
    pub fn new(latest: BTreeMap<Symbol, Date>) -> Self {
        Self(latest)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Date> {
        self.0.get(symbol).copied()
    }

    pub fn latest_or_floor(&self, symbol: &Symbol) -> Date {
        self.get(symbol).unwrap_or(EPOCH_FLOOR)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Summarizes the map against the tracked symbol set.
    pub fn summary(&self, tracked: usize) -> FreshnessSummary {
        FreshnessSummary {
            tracked,
            with_prices: self.len(),
            never_synced: tracked.saturating_sub(self.len()),
            oldest_latest: self.0.values().min().map(|date| date.to_string()),
            newest_latest: self.0.values().max().map(|date| date.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshnessSummary {
    pub tracked: usize,
    pub with_prices: usize,
    pub never_synced: usize,
    pub oldest_latest: Option<String>,
    pub newest_latest: Option<String>,
}

/// Rebuilds [`FreshnessMap`]s from a sink with one grouped query per load.
#[derive(Clone)]
pub struct FreshnessTracker {
    sink: Arc<dyn Sink>,
}

impl FreshnessTracker {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    /// Blocking load scoped to `symbols`.
    pub fn load(&self, symbols: &[Symbol]) -> Result<FreshnessMap, SinkError> {
        let tracked: BTreeSet<&Symbol> = symbols.iter().collect();
        let mut latest = self.sink.latest_dates(symbols)?;
        latest.retain(|symbol, _| tracked.contains(symbol));
        Ok(FreshnessMap(latest))
    }

    /// Same as [`load`](Self::load) on the blocking pool.
    pub async fn refresh(&self, symbols: Vec<Symbol>) -> Result<FreshnessMap, SinkError> {
        let tracker = self.clone();
        run_blocking(Arc::clone(&self.sink), move |_| tracker.load(&symbols)).await
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::memory::MemorySink;
    use crate::{PriceRecord, UtcDateTime};

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("symbol")
    }

    #[test]
    fn missing_symbols_default_to_epoch_floor() {
        let map = FreshnessMap::default();
        assert_eq!(map.get(&symbol("AAA")), None);
        assert_eq!(map.latest_or_floor(&symbol("AAA")), EPOCH_FLOOR);
    }

    #[tokio::test]
    async fn refresh_reflects_new_writes() {
        let sink = Arc::new(MemorySink::new());
        let tracker = FreshnessTracker::new(sink.clone());
        let symbols = vec![symbol("AAA"), symbol("BBB")];

        let before = tracker.refresh(symbols.clone()).await.expect("load");
        assert!(before.is_empty());

        sink.upsert_prices(&[PriceRecord::new(
            symbol("AAA"),
            date!(2024 - 01 - 10),
            1.0,
            1.0,
            1.0,
            1.0,
            UtcDateTime::parse("2024-01-12T08:00:00Z").expect("timestamp"),
        )
        .expect("record")])
        .expect("upsert");

        let after = tracker.refresh(symbols).await.expect("reload");
        assert_eq!(after.get(&symbol("AAA")), Some(date!(2024 - 01 - 10)));
        assert_eq!(after.summary(2).never_synced, 1);
    }
}
