//! Catalog: components on changeset branches, the module registry, and the
//! discovered-resource inventory with its saved views.

mod components;
mod inventory;
mod modules;

pub use components::ComponentState;

use crate::changeset::{lookup, require_readable};
use crate::domain::{BranchName, Changeset, CoreError};
use crate::store::VersionedStore;

/// Entry point for catalog reads and writes.
#[derive(Debug, Clone)]
pub struct Catalog {
    store: VersionedStore,
}

impl Catalog {
    /// Creates a catalog over `store`.
    #[must_use]
    pub fn new(store: VersionedStore) -> Self {
        Self { store }
    }

    /// Branch to read from: trunk when no changeset is named, otherwise the
    /// changeset's owning branch.
    async fn read_branch(&self, changeset: Option<&str>) -> Result<BranchName, CoreError> {
        match changeset {
            None => Ok(BranchName::trunk()),
            Some(name) => {
                let found: Changeset = lookup(&self.store, name).await?;
                require_readable(&found)?;
                Ok(found.owning_branch())
            }
        }
    }
}
