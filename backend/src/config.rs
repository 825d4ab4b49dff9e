//! Configuration management for the ledger server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with LEDGER__ prefix (e.g. LEDGER__SERVER__PORT)

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Event store configuration
    pub database: DatabaseConfig,

    /// Ledger worker configuration
    pub ledger: LedgerSettings,

    /// Transfer saga configuration
    pub transfer: TransferSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when absent
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    /// Pending commands buffered per ledger worker
    pub mailbox_capacity: usize,

    /// Seconds without a command before a worker shuts down
    pub idle_timeout_secs: u64,

    /// Write a snapshot every N events
    pub snapshot_interval: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransferSettings {
    /// Attempts per saga step, first try included
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on each further retry
    pub initial_backoff_ms: u64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("ledger.mailbox_capacity", 256)?
            .set_default("ledger.idle_timeout_secs", 300)?
            .set_default("ledger.snapshot_interval", 100)?
            .set_default("transfer.max_attempts", 5)?
            .set_default("transfer.initial_backoff_ms", 100)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER__ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 2,
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            idle_timeout_secs: 300,
            snapshot_interval: 100,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
        }
    }
}
