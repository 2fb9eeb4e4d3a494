//! Configuration loading and representation.

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::store::Pagination;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Unset means "no Postgres"; services run on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct InventoryConfig {
    /// How many times the ledger retries a movement that lost a version race.
    pub max_conflict_retries: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Fallback tracing directive when `RUST_LOG` is unset.
    pub log_filter: String,
    pub database: DatabaseConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            default_page_size: 50,
            max_page_size: 1000,
            log_filter: "info".to_string(),
            database: DatabaseConfig::default(),
        }
    }
}

impl InventoryConfig {
    /// Load from `config/equiptrack.*` (optional) and `EQUIPTRACK_*` environment
    /// variables (`EQUIPTRACK_DATABASE__URL`); `DATABASE_URL` wins for the database.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/equiptrack")
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("EQUIPTRACK")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .build()?;

        config.try_deserialize()
    }

    /// Apply the configured default/cap to caller pagination.
    pub fn paginate(&self, pagination: Pagination) -> Pagination {
        pagination.capped(self.default_page_size, self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = InventoryConfig::default();
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.max_page_size, 1000);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = InventoryConfig::load_from("config/does-not-exist").unwrap();
        assert_eq!(config.max_page_size, 1000);
    }

    #[test]
    fn paginate_caps_to_configured_maximum() {
        let config = InventoryConfig {
            max_page_size: 20,
            ..Default::default()
        };
        assert_eq!(config.paginate(Pagination { limit: 500, offset: 40 }).limit, 20);
    }
}
