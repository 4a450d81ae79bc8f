//! Working directories handed to the executor.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::warn;

use crate::domain::{CoreError, Variables};

/// File the configuration is materialized into.
pub const CONFIG_FILE: &str = "main.tf.json";

/// Local state file the executor reads and rewrites.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Everything needed to render a component's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Component name, used as the module block label.
    pub name: String,
    /// Module source address.
    pub source: String,
    /// Module version.
    pub version: String,
    /// Module input variables.
    pub variables: Variables,
}

impl ModuleConfig {
    /// Renders the `main.tf.json` document.
    #[must_use]
    pub fn render(&self) -> Value {
        let mut block = self.variables.clone();
        block.insert("source".into(), Value::String(self.source.clone()));
        block.insert("version".into(), Value::String(self.version.clone()));
        let mut modules = serde_json::Map::new();
        modules.insert(self.name.clone(), Value::Object(block));
        json!({ "module": modules })
    }
}

/// Allocates one directory per operation under a root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Creates a manager rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a fresh directory for `<kind>-<id>` holding the rendered
    /// configuration. Stale content from a previous attempt is removed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be written.
    pub async fn prepare(
        &self,
        kind: &str,
        id: i64,
        config: &ModuleConfig,
    ) -> Result<PathBuf, CoreError> {
        let dir = self.root.join(format!("{kind}-{id}"));
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;

        let rendered = serde_json::to_vec_pretty(&config.render())?;
        tokio::fs::write(dir.join(CONFIG_FILE), rendered).await?;
        Ok(dir)
    }

    /// Places previously saved executor state into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub async fn restore_state(&self, dir: &Path, state: &[u8]) -> Result<(), CoreError> {
        tokio::fs::write(dir.join(STATE_FILE), state).await?;
        Ok(())
    }

    /// Executor state left in `dir`, if the executor wrote any.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    pub async fn read_state(&self, dir: &Path) -> Result<Option<Bytes>, CoreError> {
        match tokio::fs::read(dir.join(STATE_FILE)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes a directory created by [`prepare`](Self::prepare).
    pub async fn release(&self, dir: &Path) {
        if let Err(err) = tokio::fs::remove_dir_all(dir).await {
            warn!(path = %dir.display(), error = %err, "Failed to remove workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> ModuleConfig {
        ModuleConfig {
            name: "web".into(),
            source: "registry.example.com/acme/bucket/aws".into(),
            version: "1.2.0".into(),
            variables: json!({ "x": 1, "tags": { "team": "core" } })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }

    #[test]
    fn render_builds_module_block() {
        let rendered = config().render();
        let block = &rendered["module"]["web"];

        assert_eq!(block["source"], "registry.example.com/acme/bucket/aws");
        assert_eq!(block["version"], "1.2.0");
        assert_eq!(block["x"], 1);
        assert_eq!(block["tags"]["team"], "core");
    }

    #[tokio::test]
    async fn prepare_writes_config_and_replaces_stale_dirs() -> anyhow::Result<()> {
        let root = tempdir()?;
        let manager = WorkspaceManager::new(root.path());

        let dir = manager.prepare("plan", 4, &config()).await?;
        tokio::fs::write(dir.join("leftover"), b"x").await?;
        let dir = manager.prepare("plan", 4, &config()).await?;

        assert!(!dir.join("leftover").exists());
        let written: Value = serde_json::from_slice(&tokio::fs::read(dir.join(CONFIG_FILE)).await?)?;
        assert_eq!(written, config().render());

        manager.release(&dir).await;
        assert!(!dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn state_survives_into_a_fresh_directory() -> anyhow::Result<()> {
        let root = tempdir()?;
        let manager = WorkspaceManager::new(root.path());

        let dir = manager.prepare("apply", 1, &config()).await?;
        assert_eq!(manager.read_state(&dir).await?, None);
        tokio::fs::write(dir.join(STATE_FILE), br#"{"serial":3}"#).await?;
        let saved = manager.read_state(&dir).await?.unwrap();
        manager.release(&dir).await;

        let dir = manager.prepare("plan", 2, &config()).await?;
        manager.restore_state(&dir, &saved).await?;
        assert_eq!(tokio::fs::read(dir.join(STATE_FILE)).await?, br#"{"serial":3}"#);
        Ok(())
    }
}
