//! Centralized configuration (environment variables + defaults).

use crate::error::{Result, StoreError};

pub const DEFAULT_ENGINE: &str = "InnoDB";
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATE: &str = "utf8mb4_unicode_ci";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Database URL must be provided (no default) for safety.
pub fn database_url() -> Result<String> {
    std::env::var("DATABASE_URL").map_err(|_| StoreError::Config("DATABASE_URL must be set".into()))
}

/// Prefix prepended to every table name (default: none).
pub fn table_prefix() -> String {
    std::env::var("TABLE_PREFIX").unwrap_or_default()
}

/// Storage engine used for MySQL tables.
pub fn engine() -> String {
    std::env::var("DB_ENGINE").unwrap_or_else(|_| DEFAULT_ENGINE.to_string())
}

/// Default character set used for MySQL tables.
pub fn charset() -> String {
    std::env::var("DB_CHARSET").unwrap_or_else(|_| DEFAULT_CHARSET.to_string())
}

/// Default collation used for MySQL tables.
pub fn collate() -> String {
    std::env::var("DB_COLLATE").unwrap_or_else(|_| DEFAULT_COLLATE.to_string())
}

/// Pool size (default 5, minimum 1).
pub fn max_connections() -> Result<u32> {
    parse_max_connections(std::env::var("DB_MAX_CONNECTIONS").ok())
}

fn parse_max_connections(raw: Option<String>) -> Result<u32> {
    match raw {
        None => Ok(DEFAULT_MAX_CONNECTIONS),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map(|n| n.max(1))
            .map_err(|_| StoreError::Config(format!("DB_MAX_CONNECTIONS must be a valid u32, got '{}'", v))),
    }
}

/// Connection-level parameters for [`RelationalStore`](crate::storage::RelationalStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub table_prefix: String,
    pub engine: String,
    pub charset: String,
    pub collate: String,
    pub max_connections: u32,
}

impl StoreConfig {
    /// Config for `database_url` with every other setting at its default.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            table_prefix: String::new(),
            engine: DEFAULT_ENGINE.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
            collate: DEFAULT_COLLATE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Reads the whole config from the environment (after loading `.env`).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Ok(Self {
            database_url: database_url()?,
            table_prefix: table_prefix(),
            engine: engine(),
            charset: charset(),
            collate: collate(),
            max_connections: max_connections()?,
        })
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }
}
