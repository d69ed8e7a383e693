use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Environment prefix of every connection name, e.g. "production"
    pub environment: String,
    pub database_config: PathBuf,
    pub migrations_root: PathBuf,
    pub verify_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            environment: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            database_config: env::var("DATABASE_CONFIG")
                .unwrap_or_else(|_| "config/database.json".to_string())
                .into(),
            migrations_root: env::var("MIGRATIONS_ROOT")
                .unwrap_or_else(|_| "db".to_string())
                .into(),
            verify_timeout_ms: env::var("DB_VERIFY_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),
        })
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adapter {
    Sqlite,
    Postgres,
}

/// Parameters for one physical connection, keyed by connection name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub adapter: Adapter,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    8
}

impl ConnectionParams {
    pub fn new(adapter: Adapter, url: impl Into<String>) -> Self {
        Self {
            adapter,
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// Read-only lookup of connection parameters by connection name.
/// Shared by every execution context, so implementations must tolerate
/// concurrent readers.
pub trait ConfigSource: Send + Sync {
    fn get_config(&self, name: &str) -> Option<ConnectionParams>;

    /// Every name this source can resolve, sorted
    fn known_names(&self) -> Vec<String>;
}

/// The connection store, one entry per connection name
/// (`production_directory`, `production_austin`, ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseConfigurations {
    connections: HashMap<String, ConnectionParams>,
}

impl DatabaseConfigurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigurationError(format!(
                "Failed to read database config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn insert(&mut self, name: impl Into<String>, params: ConnectionParams) {
        self.connections.insert(name.into(), params);
    }

    pub fn with(mut self, name: impl Into<String>, params: ConnectionParams) -> Self {
        self.insert(name, params);
        self
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl ConfigSource for DatabaseConfigurations {
    fn get_config(&self, name: &str) -> Option<ConnectionParams> {
        self.connections.get(name).cloned()
    }

    fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }
}
