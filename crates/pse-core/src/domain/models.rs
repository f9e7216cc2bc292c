use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::calendar::iso_date;
use crate::{Symbol, UtcDateTime, ValidationError};

/// A listed company, keyed by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub symbol: Symbol,
    pub name: String,
    pub sector: String,
    pub subsector: String,
    #[serde(with = "iso_date::option")]
    pub listing_date: Option<Date>,
    pub extracted_at: UtcDateTime,
}

impl Company {
    pub fn new(
        symbol: Symbol,
        name: impl Into<String>,
        sector: impl Into<String>,
        subsector: impl Into<String>,
        listing_date: Option<Date>,
        extracted_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        let name = name.into().trim().to_owned();
        if name.is_empty() {
            return Err(ValidationError::EmptyField { field: "name" });
        }

        Ok(Self {
            symbol,
            name,
            sector: sector.into().trim().to_owned(),
            subsector: subsector.into().trim().to_owned(),
            listing_date,
            extracted_at,
        })
    }
}

/// One trading day of prices for a symbol, keyed by `(symbol, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub symbol: Symbol,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Provenance only; not part of the key.
    pub extracted_at: UtcDateTime,
}

impl PriceRecord {
    pub fn new(
        symbol: Symbol,
        date: Date,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        extracted_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
        }

        Ok(Self {
            symbol,
            date,
            open,
            high,
            low,
            close,
            extracted_at,
        })
    }

    pub fn key(&self) -> (Symbol, Date) {
        (self.symbol.clone(), self.date)
    }
}
