//! Canonical domain types for PSE market data.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated stock symbol |
//! | [`Company`] | Listed company (entity registry row) |
//! | [`PriceRecord`] | Daily OHLC row keyed by `(symbol, date)` |
//! | [`UtcDateTime`] | UTC timestamp used for extraction provenance |

pub mod calendar;
mod models;
mod symbol;
mod timestamp;

pub use models::{Company, PriceRecord};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
