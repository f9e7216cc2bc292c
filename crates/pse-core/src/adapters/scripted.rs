use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::data_source::{PriceRequest, SourceError, SourceFuture, StockSource};
use crate::{Company, PriceRecord, Symbol};

#[derive(Debug, Default)]
struct ScriptState {
    companies: Vec<Company>,
    prices: BTreeMap<Symbol, Vec<PriceRecord>>,
    unknown: BTreeSet<Symbol>,
    failing: BTreeMap<Symbol, String>,
    panicking: BTreeSet<Symbol>,
    listing_failure: Option<String>,
    requests: Vec<PriceRequest>,
}

/// In-memory source that serves a fixed script of companies and price rows.
///
/// Price reads return the scripted rows whose date falls inside the requested
/// window, in insertion order, duplicates included.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    state: Mutex<ScriptState>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company: Company) -> Self {
        self.edit(|state| state.companies.push(company));
        self
    }

    pub fn with_prices(mut self, rows: Vec<PriceRecord>) -> Self {
        self.edit(|state| append_rows(state, rows));
        self
    }

    /// Price reads for `symbol` fail with an unknown-symbol error.
    pub fn with_unknown(mut self, symbol: Symbol) -> Self {
        self.edit(|state| {
            state.unknown.insert(symbol);
        });
        self
    }

    /// Price reads for `symbol` fail with a retryable unavailable error.
    pub fn with_failure(mut self, symbol: Symbol, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|state| {
            state.failing.insert(symbol, message);
        });
        self
    }

    /// Price reads for `symbol` panic inside the source.
    pub fn with_panic(mut self, symbol: Symbol) -> Self {
        self.edit(|state| {
            state.panicking.insert(symbol);
        });
        self
    }

    pub fn with_listing_failure(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|state| state.listing_failure = Some(message));
        self
    }

    /// Adds rows after construction, e.g. to simulate a later trading day.
    pub fn push_prices(&self, rows: Vec<PriceRecord>) {
        if let Ok(mut state) = self.state.lock() {
            append_rows(&mut state, rows);
        }
    }

    /// Every price request received so far, in arrival order.
    pub fn price_requests(&self) -> Vec<PriceRequest> {
        self.state
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    pub fn requests_for(&self, symbol: &Symbol) -> Vec<PriceRequest> {
        self.price_requests()
            .into_iter()
            .filter(|request| &request.symbol == symbol)
            .collect()
    }

    fn edit(&mut self, change: impl FnOnce(&mut ScriptState)) {
        if let Ok(state) = self.state.get_mut() {
            change(state);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ScriptState>, SourceError> {
        self.state
            .lock()
            .map_err(|_| SourceError::internal("scripted source state poisoned"))
    }
}

fn append_rows(state: &mut ScriptState, rows: Vec<PriceRecord>) {
    for row in rows {
        state.prices.entry(row.symbol.clone()).or_default().push(row);
    }
}

impl StockSource for ScriptedSource {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn list_companies<'a>(&'a self) -> SourceFuture<'a, Vec<Company>> {
        Box::pin(async move {
            let state = self.lock()?;
            match &state.listing_failure {
                Some(message) => Err(SourceError::unavailable(message.clone())),
                None => Ok(state.companies.clone()),
            }
        })
    }

    fn fetch_prices<'a>(&'a self, req: PriceRequest) -> SourceFuture<'a, Vec<PriceRecord>> {
        Box::pin(async move {
            let rows = {
                let mut state = self.lock()?;
                state.requests.push(req.clone());

                if state.panicking.contains(&req.symbol) {
                    drop(state);
                    panic!("scripted panic for {}", req.symbol);
                }
                if state.unknown.contains(&req.symbol) {
                    return Err(SourceError::unknown_symbol(&req.symbol));
                }
                if let Some(message) = state.failing.get(&req.symbol) {
                    return Err(SourceError::unavailable(message.clone()));
                }

                state
                    .prices
                    .get(&req.symbol)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| req.start.map_or(true, |start| row.date >= start))
                            .filter(|row| req.end.map_or(true, |end| row.date <= end))
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            };
            Ok(rows)
        })
    }
}
