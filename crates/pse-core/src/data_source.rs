//! Stock source trait and request types.
//!
//! A [`StockSource`] provides the two reads the sync engine needs: the full
//! company directory and the daily price history of one symbol over an
//! optional date range.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use time::Date;

use crate::{Company, PriceRecord, Symbol};

/// Boxed future returned by [`StockSource`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// The source does not know the requested symbol.
    UnknownSymbol,
    Unavailable,
    RateLimited,
    InvalidRequest,
    InvalidResponse,
    Internal,
}

impl SourceErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnknownSymbol => "source.unknown_symbol",
            Self::Unavailable => "source.unavailable",
            Self::RateLimited => "source.rate_limited",
            Self::InvalidRequest => "source.invalid_request",
            Self::InvalidResponse => "source.invalid_response",
            Self::Internal => "source.internal",
        }
    }

    /// Only outages and throttling are worth retrying on a later run.
    pub const fn retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::RateLimited)
    }
}

/// Structured source error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_symbol(symbol: &Symbol) -> Self {
        Self::new(
            SourceErrorKind::UnknownSymbol,
            format!("symbol '{symbol}' is not known to the source"),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidResponse, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Internal, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub const fn is_unknown_symbol(&self) -> bool {
        matches!(self.kind, SourceErrorKind::UnknownSymbol)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Request payload for a daily price history read.
///
/// `start` defaults to the listing date and `end` to today at the source offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRequest {
    pub symbol: Symbol,
    pub start: Option<Date>,
    pub end: Option<Date>,
}

impl PriceRequest {
    pub fn new(symbol: Symbol, start: Option<Date>, end: Option<Date>) -> Result<Self, SourceError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(SourceError::invalid_request(format!(
                    "price request for '{symbol}' starts after it ends ({start} > {end})"
                )));
            }
        }
        Ok(Self { symbol, start, end })
    }
}

/// Source adapter contract.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// sync worker.
pub trait StockSource: Send + Sync {
    /// Stable identifier used in logs and reports.
    fn id(&self) -> &'static str;

    /// Fetches the complete company directory, every page collapsed into one list.
    fn list_companies<'a>(&'a self) -> SourceFuture<'a, Vec<Company>>;

    /// Fetches daily prices for one symbol.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceErrorKind::UnknownSymbol`] error when the source has no
    /// such symbol; every other failure uses the remaining kinds.
    fn fetch_prices<'a>(&'a self, req: PriceRequest) -> SourceFuture<'a, Vec<PriceRecord>>;
}
