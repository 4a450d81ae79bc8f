//! Blob store and executor workspace locations.

use std::path::PathBuf;

use serde::Deserialize;

/// Filesystem locations.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// Root of the plan artifact and log stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Scratch space for executor working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("stackforge")
}
