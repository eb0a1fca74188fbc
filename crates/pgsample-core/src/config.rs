//! Configuration schema (pgsample.toml)

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default PostgreSQL port
pub const DEFAULT_PORT: u16 = 5432;

/// Default number of rows pulled per cursor fetch
pub const DEFAULT_FETCH_SIZE: u32 = 1000;

/// Connection section of the config file.
///
/// Every field is optional so the same type can carry CLI overrides and
/// file values; [`ConnectionConfig::resolve`] merges the layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    /// Prefer `PGPASSWORD` over storing this in a file
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub dbname: Option<String>,

    /// Connect over TLS
    #[serde(default)]
    pub tls: Option<bool>,
}

/// Fully resolved connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub tls: bool,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dbname", &self.dbname)
            .field("tls", &self.tls)
            .finish()
    }
}

impl std::fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

impl ConnectionConfig {
    /// Layer `overrides` (CLI flags) over the environment, over `self` (file),
    /// over built-in defaults.
    ///
    /// `env` is a lookup for libpq-style variables (`PGHOST`, `PGPORT`,
    /// `PGUSER`, `PGPASSWORD`, `PGDATABASE`). The database name falls back to
    /// the user name, as libpq does.
    pub fn resolve<F>(&self, overrides: &ConnectionConfig, env: F) -> Result<ConnectionSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_port = match env("PGPORT") {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                ConfigError::InvalidValue(format!("PGPORT must be a port number, got '{}'", raw))
            })?),
            None => None,
        };

        let host = overrides.host.clone()
            .or_else(|| env("PGHOST"))
            .or_else(|| self.host.clone())
            .unwrap_or_else(|| "localhost".to_string());

        let port = overrides.port
            .or(env_port)
            .or(self.port)
            .unwrap_or(DEFAULT_PORT);

        let user = overrides.user.clone()
            .or_else(|| env("PGUSER"))
            .or_else(|| self.user.clone())
            .unwrap_or_else(|| "postgres".to_string());

        let password = overrides.password.clone()
            .or_else(|| env("PGPASSWORD"))
            .or_else(|| self.password.clone());

        let dbname = overrides.dbname.clone()
            .or_else(|| env("PGDATABASE"))
            .or_else(|| self.dbname.clone())
            .unwrap_or_else(|| user.clone());

        let tls = overrides.tls.or(self.tls).unwrap_or(false);

        Ok(ConnectionSettings { host, port, user, password, dbname, tls })
    }
}

/// Dump section of the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumpConfig {
    /// Rows fetched from the server-side cursor per round trip
    #[serde(default = "default_fetch_size")]
    pub fetch_size: u32,
}

fn default_fetch_size() -> u32 {
    DEFAULT_FETCH_SIZE
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub dump: DumpConfig,
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config.dump.fetch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "dump.fetch_size must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
