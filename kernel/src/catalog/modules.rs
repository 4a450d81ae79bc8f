use super::Catalog;
use crate::domain::{BranchName, CoreError, Module, ModuleId, ModuleVersion};
use crate::repository::module;

impl Catalog {
    /// Registers a module.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` for a duplicate name.
    pub async fn create_module(&self, name: &str, source: &str) -> Result<Module, CoreError> {
        let (name, source) = (name.to_owned(), source.to_owned());
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("create module {name}"),
                move |uow| Box::pin(async move { module::create(uow, &name, &source).await }),
            )
            .await
    }

    /// Loads a module.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn get_module(&self, id: ModuleId) -> Result<Module, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move { module::get(uow, id).await })
            })
            .await
    }

    /// Every module, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_modules(&self) -> Result<Vec<Module>, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), |uow| {
                Box::pin(async move { module::list(uow).await })
            })
            .await
    }

    /// Appends a version to a module.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown module and `ConflictingState` for a
    /// version that already exists.
    pub async fn create_module_version(
        &self,
        module_id: ModuleId,
        version: &str,
    ) -> Result<ModuleVersion, CoreError> {
        let version = version.to_owned();
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("create version {version} of module {}", module_id.get()),
                move |uow| {
                    Box::pin(async move { module::create_version(uow, module_id, &version).await })
                },
            )
            .await
    }

    /// Versions of a module, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown module.
    pub async fn list_module_versions(
        &self,
        module_id: ModuleId,
    ) -> Result<Vec<ModuleVersion>, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move {
                    module::get(uow, module_id).await?;
                    module::list_versions(uow, module_id).await
                })
            })
            .await
    }
}
