use pse_core::{JobError, RegistryError, SinkError, SyncError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] pse_core::ValidationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Warehouse(#[from] pse_warehouse::WarehouseError),

    #[error(transparent)]
    Core(#[from] pse_core::CoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) => 2,
            Self::Job(JobError::Prices { source, .. }) => match source {
                SyncError::SymbolsFailed { .. } => 3,
                SyncError::DeferredMerge { .. } | SyncError::Freshness(_) => 7,
            },
            Self::Job(JobError::Registry(RegistryError::Source(_))) => 8,
            Self::Job(JobError::Registry(RegistryError::Sink(_)) | JobError::Freshness(_)) => 7,
            Self::Sink(_) | Self::Warehouse(_) => 7,
            Self::Core(pse_core::CoreError::Validation(_)) => 2,
            Self::Core(pse_core::CoreError::Serialization(_)) | Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
