//! Component repository (versioned).

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::rows;
use crate::domain::{
    Component, ComponentId, CoreError, ModuleVersionId, UserError, Variables,
};
use crate::store::{schema::COMPONENTS, timestamp, UnitOfWork};

const SELECT: &str = "SELECT id, module_version_id, name, variables, created_at, updated_at \
                      FROM components WHERE branch = ?";

/// Fields of a new component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComponent {
    /// Module version to instantiate.
    pub module_version_id: ModuleVersionId,
    /// Name, unique per branch.
    pub name: String,
    /// Module inputs.
    #[serde(default)]
    pub variables: Variables,
}

/// Partial update of a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentChanges {
    /// New module version.
    #[serde(default)]
    pub module_version_id: Option<ModuleVersionId>,
    /// Replacement variables.
    #[serde(default)]
    pub variables: Option<Variables>,
}

impl ComponentChanges {
    /// Returns true when nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.module_version_id.is_none() && self.variables.is_none()
    }
}

fn from_row(row: &SqliteRow) -> Result<Component, CoreError> {
    Ok(Component {
        id: ComponentId::new(row.try_get("id")?),
        module_version_id: ModuleVersionId::new(row.try_get("module_version_id")?),
        name: row.try_get("name")?,
        variables: rows::json(row, "variables")?,
        created_at: rows::timestamp(row, "created_at")?,
        updated_at: rows::timestamp(row, "updated_at")?,
    })
}

/// Inserts a component on the unit-of-work branch.
///
/// # Errors
///
/// Returns `ConflictingState` if the name is taken on this branch.
pub async fn create(uow: &mut UnitOfWork, new: &NewComponent) -> Result<Component, CoreError> {
    if find_by_name(uow, &new.name).await?.is_some() {
        return Err(UserError::conflict(format!("component {} already exists", new.name)).into());
    }
    let id = uow.next_id(&COMPONENTS).await?;
    let branch = uow.branch().as_str().to_owned();
    let now = timestamp();
    sqlx::query(
        "INSERT INTO components (branch, id, module_version_id, name, variables, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(branch)
    .bind(id)
    .bind(new.module_version_id.get())
    .bind(&new.name)
    .bind(serde_json::to_string(&new.variables)?)
    .bind(&now)
    .bind(&now)
    .execute(uow.writer()?)
    .await?;

    get(uow, ComponentId::new(id)).await
}

/// Loads a component if it exists on this branch.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn find(uow: &mut UnitOfWork, id: ComponentId) -> Result<Option<Component>, CoreError> {
    let branch = uow.branch().as_str().to_owned();
    let row = sqlx::query(&format!("{SELECT} AND id = ?"))
        .bind(branch)
        .bind(id.get())
        .fetch_optional(uow.reader())
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Loads a component.
///
/// # Errors
///
/// Returns `NotFound` if it is not on this branch.
pub async fn get(uow: &mut UnitOfWork, id: ComponentId) -> Result<Component, CoreError> {
    find(uow, id)
        .await?
        .ok_or_else(|| UserError::not_found("component", id.get()).into())
}

async fn find_by_name(uow: &mut UnitOfWork, name: &str) -> Result<Option<Component>, CoreError> {
    let branch = uow.branch().as_str().to_owned();
    let row = sqlx::query(&format!("{SELECT} AND name = ?"))
        .bind(branch)
        .bind(name)
        .fetch_optional(uow.reader())
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Every component on this branch, oldest first.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list(uow: &mut UnitOfWork) -> Result<Vec<Component>, CoreError> {
    let branch = uow.branch().as_str().to_owned();
    let rows = sqlx::query(&format!("{SELECT} ORDER BY id"))
        .bind(branch)
        .fetch_all(uow.reader())
        .await?;
    rows.iter().map(from_row).collect()
}

/// Applies `changes` to a component.
///
/// # Errors
///
/// Returns `NotFound` if the component is not on this branch.
pub async fn update(
    uow: &mut UnitOfWork,
    id: ComponentId,
    changes: &ComponentChanges,
) -> Result<Component, CoreError> {
    let current = get(uow, id).await?;
    let module_version_id = changes
        .module_version_id
        .unwrap_or(current.module_version_id);
    let variables = changes.variables.as_ref().unwrap_or(&current.variables);

    let branch = uow.branch().as_str().to_owned();
    sqlx::query(
        "UPDATE components SET module_version_id = ?, variables = ?, updated_at = ?
         WHERE branch = ? AND id = ?",
    )
    .bind(module_version_id.get())
    .bind(serde_json::to_string(variables)?)
    .bind(timestamp())
    .bind(branch)
    .bind(id.get())
    .execute(uow.writer()?)
    .await?;

    get(uow, id).await
}
