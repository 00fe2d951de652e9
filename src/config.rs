//! Application configuration.
//!
//! Defaults, then `~/.lotbook/config.toml` (or `$LOTBOOK_CONFIG`), then the
//! `LOTBOOK_DB`, `LOTBOOK_OWNER` and `LOTBOOK_LOG` environment variables.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::corporate_actions::DEFAULT_SPINOFF_ALLOCATION;
use crate::error::{Error, Result};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file; `~/.lotbook/data.db` when unset
    pub database_path: Option<PathBuf>,

    /// Identity presented to the core by the CLI
    pub owner_id: Uuid,

    pub quote_cache_ttl_secs: u64,
    pub quote_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub rate_limit_backoff_secs: u64,

    /// Cost share moved to the child when a spinoff announcement omits it
    pub default_spinoff_allocation: Decimal,

    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            owner_id: Uuid::nil(),
            quote_cache_ttl_secs: 300,
            quote_timeout_secs: 10,
            batch_timeout_secs: 30,
            rate_limit_backoff_secs: 12,
            default_spinoff_allocation: DEFAULT_SPINOFF_ALLOCATION,
            log_filter: "lotbook=info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::validation(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| Error::validation(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the full configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an injectable environment.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let explicit = env("LOTBOOK_CONFIG").map(PathBuf::from);
        let default_path = env("HOME").map(|h| PathBuf::from(h).join(".lotbook").join("config.toml"));

        let mut config = match (&explicit, &default_path) {
            (Some(path), _) => Self::from_file(path)?,
            (None, Some(path)) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };

        if let Some(db) = env("LOTBOOK_DB").filter(|v| !v.is_empty()) {
            config.database_path = Some(PathBuf::from(db));
        }
        if let Some(owner) = env("LOTBOOK_OWNER").filter(|v| !v.is_empty()) {
            config.owner_id = Uuid::from_str(owner.trim())
                .map_err(|e| Error::validation(format!("LOTBOOK_OWNER is not a UUID: {}", e)))?;
        }
        if let Some(filter) = env("LOTBOOK_LOG").filter(|v| !v.is_empty()) {
            config.log_filter = filter;
        }
        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let alpha = self.default_spinoff_allocation;
        if alpha <= Decimal::ZERO || alpha >= Decimal::ONE {
            return Err(Error::validation(format!(
                "default_spinoff_allocation must be between 0 and 1 exclusive, got {}",
                alpha
            )));
        }
        if self.quote_timeout_secs == 0 || self.batch_timeout_secs == 0 {
            return Err(Error::validation("timeouts must be at least one second"));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::db::get_default_db_path(),
        }
    }

    pub fn quote_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_cache_ttl_secs)
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_secs(self.quote_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}
