//! Configuration management for the stackforge control plane.
//!
//! Settings are assembled from built-in defaults overlaid with
//! `STACKFORGE__*` environment variables.
//!
//! # Example
//!
//! ```no_run
//! use stackforge_kernel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! assert_eq!(settings.executor.binary, "tofu");
//! ```

pub mod database;
pub mod executor;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod workers;

pub use database::DatabaseSettings;
pub use executor::ExecutorSettings;
pub use server::ServerSettings;
pub use storage::StorageSettings;
pub use telemetry::TelemetrySettings;
pub use workers::WorkerSettings;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "STACKFORGE";

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Logging, tracing and metrics settings.
    pub telemetry: TelemetrySettings,
    /// Versioned store settings.
    pub database: DatabaseSettings,
    /// Plan and apply worker settings.
    #[serde(default)]
    pub workers: WorkerSettings,
    /// Blob and workspace directories.
    #[serde(default)]
    pub storage: StorageSettings,
    /// External executor settings.
    #[serde(default)]
    pub executor: ExecutorSettings,
}

impl Settings {
    /// Creates a new settings instance from environment variables and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    /// Builds settings from defaults overlaid with `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong type.
    pub fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9090)?
            .set_default("telemetry.service_name", "stackforge")?
            .set_default("telemetry.sampling_ratio", 1.0)?
            .set_default("telemetry.log_level", "info")?
            .set_default("database.url", "sqlite://stackforge.db")?
            .set_default("database.max_connections", 5)?
            .add_source(env)
            .build()?;

        s.try_deserialize()
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> BindAddress {
        BindAddress(self.server.host.clone(), self.server.port)
    }
}

/// Helper for strong typing addresses
pub struct BindAddress(pub String, pub u16);

impl BindAddress {
    /// Converts the bind address to a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP address string cannot be parsed.
    pub fn to_socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let ip = self
            .0
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid IP address '{}': {e}", self.0))?;
        Ok(std::net::SocketAddr::new(ip, self.1))
    }
}
