//! Core contracts and the sync engine for pse-etl.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - The source and sink contracts, plus the PSE Edge adapter
//! - Freshness tracking, fetch windows and deduplication
//! - The concurrent scheduler and the end-to-end job
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`domain`] | Symbols, companies, price rows, timestamps |
//! | [`data_source`] | [`StockSource`] contract and structured source errors |
//! | [`sink`] | [`Sink`] contract implemented by every storage backend |
//! | [`freshness`] | Latest stored date per symbol |
//! | [`window`] | Fetch window planning and run parameters |
//! | [`scheduler`] | Bounded worker pool with per-symbol isolation |
//! | [`job`] | Registry, prices, freshness in one run |

pub mod adapters;
pub mod clock;
pub mod data_source;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod freshness;
pub mod http_client;
pub mod job;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod throttling;
pub mod window;

#[cfg(any(test, feature = "test-support"))]
pub use adapters::ScriptedSource;
pub use adapters::{PseEdgeAdapter, PseEdgeConfig};
pub use clock::{Clock, FixedClock, SystemClock};
pub use data_source::{PriceRequest, SourceError, SourceErrorKind, StockSource};
pub use dedup::DedupPolicy;
pub use domain::{Company, PriceRecord, Symbol, UtcDateTime};
pub use error::{CoreError, ValidationError};
pub use freshness::{FreshnessMap, FreshnessSummary, FreshnessTracker};
pub use http_client::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use job::{JobError, JobMode, JobReport, SyncJob};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemorySink;
pub use registry::{RegistryError, RegistryReport, RegistrySync};
pub use scheduler::{
    EngineConfig, FailureStage, SymbolFailure, SymbolOutcome, SymbolStatus, SyncEngine, SyncError,
    SyncReport,
};
pub use sink::{MergeStrategy, Sink, SinkError};
pub use throttling::RequestThrottle;
pub use window::{FetchPlan, FetchWindow, SyncParams};
