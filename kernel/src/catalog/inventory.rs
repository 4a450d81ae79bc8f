use tracing::{info, instrument};

use super::Catalog;
use crate::domain::{BranchName, CoreError, Resource, ResourceQuery, ViewResource};
use crate::repository::{inventory, ReconcileBatch, ReconcileReport};

impl Catalog {
    /// Every discovered resource.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), |uow| {
                Box::pin(async move { inventory::list_resources(uow).await })
            })
            .await
    }

    /// Applies a discovery pass in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure; nothing is written then.
    #[instrument(skip(self, batch), fields(upserts = batch.upserts.len(), deletes = batch.deletes.len()))]
    pub async fn reconcile_resources(
        &self,
        batch: ReconcileBatch,
    ) -> Result<ReconcileReport, CoreError> {
        let report = self
            .store
            .transact(&BranchName::trunk(), "reconcile resources", move |uow| {
                Box::pin(async move { inventory::reconcile(uow, &batch).await })
            })
            .await?;
        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Resources reconciled"
        );
        Ok(report)
    }

    /// Saves a view, replacing one with the same name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty name.
    pub async fn save_view(&self, name: &str, query: ResourceQuery) -> Result<ViewResource, CoreError> {
        let name = name.to_owned();
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("save view {name}"),
                move |uow| Box::pin(async move { inventory::save_view(uow, &name, &query).await }),
            )
            .await
    }

    /// Loads a view.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn get_view(&self, name: &str) -> Result<ViewResource, CoreError> {
        let name = name.to_owned();
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move { inventory::get_view(uow, &name).await })
            })
            .await
    }

    /// Every saved view.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_views(&self) -> Result<Vec<ViewResource>, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), |uow| {
                Box::pin(async move { inventory::list_views(uow).await })
            })
            .await
    }

    /// Deletes a view.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn delete_view(&self, name: &str) -> Result<(), CoreError> {
        let name = name.to_owned();
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("delete view {name}"),
                move |uow| Box::pin(async move { inventory::delete_view(uow, &name).await }),
            )
            .await
    }

    /// Resources matched by a saved view.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the view does not exist.
    pub async fn evaluate_view(&self, name: &str) -> Result<Vec<Resource>, CoreError> {
        let name = name.to_owned();
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move {
                    let view = inventory::get_view(uow, &name).await?;
                    let resources = inventory::list_resources(uow).await?;
                    Ok::<_, CoreError>(
                        resources
                            .into_iter()
                            .filter(|r| view.query.matches(r))
                            .collect(),
                    )
                })
            })
            .await
    }
}
