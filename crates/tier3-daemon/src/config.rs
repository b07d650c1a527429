//! Daemon configuration.
//!
//! A TOML file supplies defaults; command-line flags override individual
//! values. Every key has a working default so the daemon starts with no
//! config file at all.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Days of daily-count history kept by the startup sweep.
pub const DAILY_COUNT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon settings, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Address the POS listener binds.
    pub listen_addr: SocketAddr,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Loyalty amount applied when a matched allowance row carries none.
    pub default_loyalty_discount: Decimal,
    /// Default log filter, overridable per run.
    pub log_level: String,
    /// Log to this file instead of stdout when set.
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9000".parse().expect("static default address"),
            database_path: PathBuf::from("loyalty.db"),
            default_loyalty_discount: Decimal::new(97, 2),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.database_path, PathBuf::from("loyalty.db"));
        assert_eq!(config.default_loyalty_discount, Decimal::new(97, 2));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: DaemonConfig =
            toml::from_str("listen_addr = \"127.0.0.1:9100\"").unwrap();
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<DaemonConfig, _> = toml::from_str("listne_addr = \"x\"");
        assert!(result.is_err());
    }

    #[test]
    fn discount_parses_from_toml_string() {
        let config: DaemonConfig =
            toml::from_str("default_loyalty_discount = \"1.50\"").unwrap();
        assert_eq!(config.default_loyalty_discount, Decimal::new(150, 2));
    }
}
