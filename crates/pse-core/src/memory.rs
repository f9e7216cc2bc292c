use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use time::Date;

use crate::sink::{MergeStrategy, Sink, SinkError};
use crate::{Company, PriceRecord, Symbol};

#[derive(Debug, Default)]
struct MemoryState {
    companies: BTreeMap<Symbol, Company>,
    prices: BTreeMap<(Symbol, Date), PriceRecord>,
    price_upsert_calls: usize,
    failing_symbols: BTreeSet<Symbol>,
}

/// In-process keyed sink for tests, with injectable upsert failures.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    strategy: MergeStrategy,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(strategy: MergeStrategy) -> Self {
        Self {
            state: Mutex::default(),
            strategy,
        }
    }

    /// Makes every later price upsert containing `symbol` fail.
    pub fn fail_prices_for(&self, symbol: Symbol) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_symbols.insert(symbol);
        }
    }

    pub fn companies(&self) -> Vec<Company> {
        self.lock()
            .map(|state| state.companies.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All stored prices ordered by `(symbol, date)`.
    pub fn prices(&self) -> Vec<PriceRecord> {
        self.lock()
            .map(|state| state.prices.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn prices_for(&self, symbol: &Symbol) -> Vec<PriceRecord> {
        self.prices()
            .into_iter()
            .filter(|row| &row.symbol == symbol)
            .collect()
    }

    pub fn price_upsert_calls(&self) -> usize {
        self.lock()
            .map(|state| state.price_upsert_calls)
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, SinkError> {
        self.state
            .lock()
            .map_err(|_| SinkError::backend("memory", "state mutex poisoned"))
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn merge_strategy(&self) -> MergeStrategy {
        self.strategy
    }

    fn initialize(&self) -> Result<(), SinkError> {
        self.lock().map(|_| ())
    }

    fn reset(&self) -> Result<(), SinkError> {
        let mut state = self.lock()?;
        state.companies.clear();
        state.prices.clear();
        Ok(())
    }

    fn upsert_companies(&self, rows: &[Company]) -> Result<usize, SinkError> {
        let mut state = self.lock()?;
        for row in rows {
            state.companies.insert(row.symbol.clone(), row.clone());
        }
        Ok(rows.len())
    }

    fn upsert_prices(&self, rows: &[PriceRecord]) -> Result<usize, SinkError> {
        let mut state = self.lock()?;
        state.price_upsert_calls += 1;
        if let Some(row) = rows
            .iter()
            .find(|row| state.failing_symbols.contains(&row.symbol))
        {
            return Err(SinkError::backend(
                "memory",
                format!("injected failure for {}", row.symbol),
            ));
        }

        for row in rows {
            state.prices.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    fn latest_dates(&self, symbols: &[Symbol]) -> Result<BTreeMap<Symbol, Date>, SinkError> {
        let state = self.lock()?;
        let wanted: BTreeSet<&Symbol> = symbols.iter().collect();
        let mut latest = BTreeMap::new();
        for (symbol, date) in state.prices.keys() {
            if wanted.contains(symbol) {
                latest
                    .entry(symbol.clone())
                    .and_modify(|current: &mut Date| *current = (*current).max(*date))
                    .or_insert(*date);
            }
        }
        Ok(latest)
    }
}
