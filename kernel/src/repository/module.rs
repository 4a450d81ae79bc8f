//! Module and module version repositories (global).

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::rows;
use crate::domain::{CoreError, Module, ModuleId, ModuleVersion, ModuleVersionId, UserError};
use crate::store::{timestamp, UnitOfWork};

fn module_from_row(row: &SqliteRow) -> Result<Module, CoreError> {
    Ok(Module {
        id: ModuleId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        source: row.try_get("source")?,
        created_at: rows::timestamp(row, "created_at")?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<ModuleVersion, CoreError> {
    Ok(ModuleVersion {
        id: ModuleVersionId::new(row.try_get("id")?),
        module_id: ModuleId::new(row.try_get("module_id")?),
        version: row.try_get("version")?,
        created_at: rows::timestamp(row, "created_at")?,
    })
}

/// Inserts a module.
///
/// # Errors
///
/// Returns `InvalidInput` for empty fields and `ConflictingState` for a
/// duplicate name.
pub async fn create(uow: &mut UnitOfWork, name: &str, source: &str) -> Result<Module, CoreError> {
    if name.trim().is_empty() || source.trim().is_empty() {
        return Err(UserError::invalid("module name and source are required").into());
    }
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM modules WHERE name = ?")
        .bind(name)
        .fetch_optional(uow.reader())
        .await?;
    if existing.is_some() {
        return Err(UserError::conflict(format!("module {name} already exists")).into());
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO modules (name, source, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(source)
    .bind(timestamp())
    .fetch_one(uow.writer()?)
    .await?;
    get(uow, ModuleId::new(id)).await
}

/// Loads a module.
///
/// # Errors
///
/// Returns `NotFound` if it does not exist.
pub async fn get(uow: &mut UnitOfWork, id: ModuleId) -> Result<Module, CoreError> {
    let row = sqlx::query("SELECT id, name, source, created_at FROM modules WHERE id = ?")
        .bind(id.get())
        .fetch_optional(uow.reader())
        .await?
        .ok_or_else(|| UserError::not_found("module", id.get()))?;
    module_from_row(&row)
}

/// Every module, oldest first.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list(uow: &mut UnitOfWork) -> Result<Vec<Module>, CoreError> {
    let rows = sqlx::query("SELECT id, name, source, created_at FROM modules ORDER BY id")
        .fetch_all(uow.reader())
        .await?;
    rows.iter().map(module_from_row).collect()
}

/// Appends a version to a module.
///
/// # Errors
///
/// Returns `NotFound` for an unknown module and `ConflictingState` if the
/// version already exists.
pub async fn create_version(
    uow: &mut UnitOfWork,
    module_id: ModuleId,
    version: &str,
) -> Result<ModuleVersion, CoreError> {
    if version.trim().is_empty() {
        return Err(UserError::invalid("version is required").into());
    }
    get(uow, module_id).await?;
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM module_versions WHERE module_id = ? AND version = ?")
            .bind(module_id.get())
            .bind(version)
            .fetch_optional(uow.reader())
            .await?;
    if existing.is_some() {
        return Err(UserError::conflict(format!(
            "module {module_id} already has version {version}"
        ))
        .into());
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO module_versions (module_id, version, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(module_id.get())
    .bind(version)
    .bind(timestamp())
    .fetch_one(uow.writer()?)
    .await?;
    get_version(uow, ModuleVersionId::new(id)).await
}

/// Loads a module version.
///
/// # Errors
///
/// Returns `NotFound` if it does not exist.
pub async fn get_version(
    uow: &mut UnitOfWork,
    id: ModuleVersionId,
) -> Result<ModuleVersion, CoreError> {
    let row = sqlx::query(
        "SELECT id, module_id, version, created_at FROM module_versions WHERE id = ?",
    )
    .bind(id.get())
    .fetch_optional(uow.reader())
    .await?
    .ok_or_else(|| UserError::not_found("module version", id.get()))?;
    version_from_row(&row)
}

/// Versions of a module, oldest first.
///
/// # Errors
///
/// Returns `NotFound` for an unknown module.
pub async fn list_versions(
    uow: &mut UnitOfWork,
    module_id: ModuleId,
) -> Result<Vec<ModuleVersion>, CoreError> {
    get(uow, module_id).await?;
    let rows = sqlx::query(
        "SELECT id, module_id, version, created_at FROM module_versions WHERE module_id = ? ORDER BY id",
    )
    .bind(module_id.get())
    .fetch_all(uow.reader())
    .await?;
    rows.iter().map(version_from_row).collect()
}
