//! Configuration management

use std::path::PathBuf;

use crate::error::{EtlError, Result};

/// Default directory holding the four collection exports.
pub const DEFAULT_COLLECTIONS_DIR: &str = "collections";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing clients.json, suppliers.json, sonar_runs.json,
    /// sonar_results.json.
    pub collections_dir: PathBuf,
    pub database: DatabaseConfig,
    /// Run extract + transform only; skip the Loader entirely.
    pub dry_run: bool,
    /// Also persist the two intermediate tables (results_per_part_shop,
    /// merged_results_runs).
    pub all_tables: bool,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment and defaults. Callers apply any
    /// CLI overrides and then run [`Config::validate`].
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            collections_dir: std::env::var("SONAR_ETL_COLLECTIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_COLLECTIONS_DIR)),
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok(),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            dry_run: false,
            all_tables: false,
        };

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.dry_run && self.database.url.is_none() {
            return Err(EtlError::Config(
                "DATABASE_URL is not set (use --dry-run to skip loading)".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(EtlError::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
