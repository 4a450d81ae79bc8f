//! External executor settings.

use serde::Deserialize;

/// Which infrastructure tool drives plans and applies.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorSettings {
    /// Binary name or path, e.g. `tofu` or `terraform`.
    #[serde(default = "default_binary")]
    pub binary: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
        }
    }
}

fn default_binary() -> String {
    "tofu".to_owned()
}
