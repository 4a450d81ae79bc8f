//! Versioned store connection settings.

use secrecy::SecretString;
use serde::Deserialize;

/// Database connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// Database connection URL, e.g. `sqlite://stackforge.db`.
    pub url: SecretString,
    /// Pool size. Ignored for in-memory databases.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}
