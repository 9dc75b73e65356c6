//! Configuration management for the bakery fulfillment engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Shared configuration file (config/default.toml)
//! 3. Environment files (config/development.toml, config/production.toml)
//! 4. Environment variable overrides with BAKERY_ prefix

use std::time::Duration;

use chrono::FixedOffset;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use shared::SizeConfig;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Which document store backs the engine
    pub store: StoreConfig,

    /// Database configuration, used by the postgres store
    pub database: DatabaseConfig,

    /// Conflict retry policy for atomic units
    pub retry: RetrySettings,

    /// Bakery-local settings
    pub business: BusinessConfig,

    /// Reservation housekeeping
    pub reservations: ReservationConfig,

    /// Size and variety catalog
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessConfig {
    /// Offset used to decide which calendar day an order was placed on
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    /// Cancelled reservations are kept this long for audit
    pub retention_days: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub varieties: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<SizeConfig>,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("BAKERY_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = Self::layered("config", &environment)?
            // Override with environment variables (BAKERY_ prefix)
            .add_source(
                Environment::with_prefix("BAKERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Code defaults, then `{dir}/default`, then `{dir}/{environment}`
    fn layered(dir: &str, environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let builder = config::Config::builder()
            // Start with default values
            .set_default("environment", environment)?
            .set_default("store.backend", "memory")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("retry.max_attempts", 5)?
            .set_default("retry.base_delay_ms", 20)?
            .set_default("retry.max_delay_ms", 1000)?
            .set_default("retry.backoff_multiplier", 2.0)?
            .set_default("business.utc_offset_minutes", 480)?
            .set_default("reservations.retention_days", 30)?
            // Settings shared by every environment
            .add_source(File::with_name(&format!("{}/default", dir)).required(false))
            // Load environment-specific config file
            .add_source(File::with_name(&format!("{}/{}", dir, environment)).required(false));

        Ok(builder)
    }
}

impl BusinessConfig {
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 480,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 20,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}
