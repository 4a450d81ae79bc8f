use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::Catalog;
use crate::changeset::{lookup, require_open};
use crate::domain::{Component, ComponentId, CoreError, State, StateResource, UserError};
use crate::repository::{self, component, module, state, ComponentChanges, NewComponent};

/// Last applied state of a component and its resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    /// State row.
    #[serde(flatten)]
    pub state: State,
    /// Resources keyed by address.
    pub resources: Vec<StateResource>,
}

impl Catalog {
    /// Creates a component on an open changeset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset or module version,
    /// `InvalidInput` for an empty name and `ConflictingState` for a
    /// duplicate name or a changeset that is not open.
    #[instrument(skip(self, new), fields(component = %new.name))]
    pub async fn create_component(
        &self,
        changeset_name: &str,
        new: NewComponent,
    ) -> Result<Component, CoreError> {
        if new.name.trim().is_empty() {
            return Err(UserError::invalid("component name is required").into());
        }
        let changeset = lookup(&self.store, changeset_name).await?;
        require_open(&changeset)?;
        let changeset_id = changeset.id;

        self.store
            .transact(
                &changeset.branch(),
                &format!("create component {}", new.name),
                move |uow| {
                    Box::pin(async move {
                        require_open(&repository::changeset::get(uow, changeset_id).await?)?;
                        module::get_version(uow, new.module_version_id).await?;
                        component::create(uow, &new).await
                    })
                },
            )
            .await
    }

    /// Updates the module version and/or variables of a component.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty update and `NotFound` if the
    /// component is not on the changeset branch.
    #[instrument(skip(self, changes))]
    pub async fn update_component(
        &self,
        changeset_name: &str,
        id: ComponentId,
        changes: ComponentChanges,
    ) -> Result<Component, CoreError> {
        if changes.is_empty() {
            return Err(UserError::invalid("nothing to update").into());
        }
        let changeset = lookup(&self.store, changeset_name).await?;
        require_open(&changeset)?;
        let changeset_id = changeset.id;

        self.store
            .transact(
                &changeset.branch(),
                &format!("update component {}", id.get()),
                move |uow| {
                    Box::pin(async move {
                        require_open(&repository::changeset::get(uow, changeset_id).await?)?;
                        if let Some(version) = changes.module_version_id {
                            module::get_version(uow, version).await?;
                        }
                        component::update(uow, id, &changes).await
                    })
                },
            )
            .await
    }

    /// Loads a component from a changeset, or from trunk when `changeset`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the component is not on that branch.
    pub async fn get_component(
        &self,
        changeset: Option<&str>,
        id: ComponentId,
    ) -> Result<Component, CoreError> {
        let branch = self.read_branch(changeset).await?;
        self.store
            .checkout(&branch, move |uow| {
                Box::pin(async move { component::get(uow, id).await })
            })
            .await
    }

    /// Components of a changeset, or of trunk when `changeset` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset.
    pub async fn list_components(&self, changeset: Option<&str>) -> Result<Vec<Component>, CoreError> {
        let branch = self.read_branch(changeset).await?;
        self.store
            .checkout(&branch, |uow| {
                Box::pin(async move { component::list(uow).await })
            })
            .await
    }

    /// Applied state of a component.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the component does not exist or was never
    /// applied on that branch.
    pub async fn component_state(
        &self,
        changeset: Option<&str>,
        id: ComponentId,
    ) -> Result<ComponentState, CoreError> {
        let branch = self.read_branch(changeset).await?;
        self.store
            .checkout(&branch, move |uow| {
                Box::pin(async move {
                    component::get(uow, id).await?;
                    let current = state::find_for_component(uow, id)
                        .await?
                        .ok_or_else(|| UserError::not_found("state", id))?;
                    let resources = state::list_resources(uow, current.id).await?;
                    Ok::<_, CoreError>(ComponentState {
                        state: current,
                        resources,
                    })
                })
            })
            .await
    }
}
