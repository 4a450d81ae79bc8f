//! Logging, tracing and metrics settings.

use std::path::PathBuf;

use serde::Deserialize;

/// Telemetry configuration settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name for telemetry.
    pub service_name: String,
    /// OTLP endpoint for traces.
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio for traces.
    #[serde(default = "default_sampling")]
    pub sampling_ratio: f64,
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily rolling log files. Logs go to stdout when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

pub(super) fn default_sampling() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_owned()
}
