use std::path::PathBuf;

use pse_core::{DedupPolicy, EngineConfig, PseEdgeConfig, SyncParams};
use pse_warehouse::{resolve_home, LakeConfig, WarehouseConfig};

use crate::cli::{Action, Cli, DedupArg, Destination};
use crate::error::CliError;

/// Everything one invocation needs, resolved from flags, environment, and defaults.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub action: Action,
    pub destination: Destination,
    pub warehouse: WarehouseConfig,
    pub lake: LakeConfig,
    pub params: SyncParams,
    pub engine: EngineConfig,
    pub source: PseEdgeConfig,
    pub pretty: bool,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let params = SyncParams::new(cli.lookback_days, cli.freshness_days, cli.concurrency)?;
        if cli.timeout_ms == 0 {
            return Err(CliError::Config(String::from(
                "--timeout-ms must be greater than zero",
            )));
        }
        if cli.requests_per_second == 0 {
            return Err(CliError::Config(String::from(
                "--requests-per-second must be greater than zero",
            )));
        }

        let home = cli.home.clone().unwrap_or_else(resolve_home);
        let mut warehouse = WarehouseConfig::under_home(home.clone());
        if let Some(db_path) = &cli.db_path {
            warehouse.db_path = db_path.clone();
        }
        warehouse.max_pool_size = warehouse.max_pool_size.max(cli.concurrency);

        let mut lake = LakeConfig::under_home(&home);
        if let Some(root) = &cli.lake_root {
            lake.root = root.clone();
        }

        let source = PseEdgeConfig {
            timeout_ms: cli.timeout_ms,
            requests_per_second: cli.requests_per_second,
            ..PseEdgeConfig::default()
        };

        Ok(Self {
            action: cli.action,
            destination: cli.destination,
            warehouse,
            lake,
            params,
            engine: EngineConfig {
                source_offset: source.source_offset,
                dedup: match cli.dedup {
                    DedupArg::MaxClose => DedupPolicy::MaxClose,
                    DedupArg::LastSeen => DedupPolicy::LastSeen,
                },
            },
            source,
            pretty: cli.pretty,
        })
    }

    pub fn destination_path(&self) -> PathBuf {
        match self.destination {
            Destination::Duckdb => self.warehouse.db_path.clone(),
            Destination::Lake => self.lake.root.clone(),
        }
    }
}
