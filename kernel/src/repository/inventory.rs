//! Discovered resource and saved view repositories (global).

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::rows;
use crate::domain::{CoreError, Resource, ResourceQuery, UserError, ViewResource, ViewResourceId};
use crate::store::{timestamp, UnitOfWork};

/// A resource as reported by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    /// Stable identity.
    pub id: Uuid,
    /// Resource kind.
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Reporting provider.
    pub provider: String,
    /// Raw attributes.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// One reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileBatch {
    /// Resources to insert or update.
    #[serde(default)]
    pub upserts: Vec<DiscoveredResource>,
    /// Resources that disappeared.
    #[serde(default)]
    pub deletes: Vec<Uuid>,
}

/// Counts produced by a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Newly inserted resources.
    pub inserted: usize,
    /// Existing resources whose fields were overwritten.
    pub updated: usize,
    /// Removed resources.
    pub deleted: usize,
}

fn resource_from_row(row: &SqliteRow) -> Result<Resource, CoreError> {
    let id: String = row.try_get("id")?;
    Ok(Resource {
        id: Uuid::parse_str(&id)?,
        kind: row.try_get("kind")?,
        name: row.try_get("name")?,
        provider: row.try_get("provider")?,
        attributes: rows::json(row, "attributes")?,
        updated_at: rows::timestamp(row, "updated_at")?,
    })
}

fn view_from_row(row: &SqliteRow) -> Result<ViewResource, CoreError> {
    Ok(ViewResource {
        id: ViewResourceId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        query: rows::json(row, "query")?,
        updated_at: rows::timestamp(row, "updated_at")?,
    })
}

/// Every discovered resource, ordered by kind then name.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_resources(uow: &mut UnitOfWork) -> Result<Vec<Resource>, CoreError> {
    let rows = sqlx::query(
        "SELECT id, kind, name, provider, attributes, updated_at FROM resources ORDER BY kind, name, id",
    )
    .fetch_all(uow.reader())
    .await?;
    rows.iter().map(resource_from_row).collect()
}

/// Applies a reconciliation pass.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn reconcile(
    uow: &mut UnitOfWork,
    batch: &ReconcileBatch,
) -> Result<ReconcileReport, CoreError> {
    let mut report = ReconcileReport::default();
    let now = timestamp();

    for resource in &batch.upserts {
        let id = resource.id.to_string();
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM resources WHERE id = ?")
            .bind(&id)
            .fetch_optional(uow.reader())
            .await?;
        sqlx::query(
            "INSERT INTO resources (id, kind, name, provider, attributes, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 kind = excluded.kind,
                 name = excluded.name,
                 provider = excluded.provider,
                 attributes = excluded.attributes,
                 updated_at = excluded.updated_at",
        )
        .bind(&id)
        .bind(&resource.kind)
        .bind(&resource.name)
        .bind(&resource.provider)
        .bind(serde_json::to_string(&resource.attributes)?)
        .bind(&now)
        .execute(uow.writer()?)
        .await?;
        if exists.is_some() {
            report.updated += 1;
        } else {
            report.inserted += 1;
        }
    }

    for id in &batch.deletes {
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id.to_string())
            .execute(uow.writer()?)
            .await?;
        report.deleted += usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
    }

    Ok(report)
}

/// Saves a view, replacing any view with the same name.
///
/// # Errors
///
/// Returns `InvalidInput` for an empty name.
pub async fn save_view(
    uow: &mut UnitOfWork,
    name: &str,
    query: &ResourceQuery,
) -> Result<ViewResource, CoreError> {
    if name.trim().is_empty() {
        return Err(UserError::invalid("view name is required").into());
    }
    sqlx::query(
        "INSERT INTO view_resources (name, query, updated_at) VALUES (?, ?, ?)
         ON CONFLICT (name) DO UPDATE SET query = excluded.query, updated_at = excluded.updated_at",
    )
    .bind(name)
    .bind(serde_json::to_string(query)?)
    .bind(timestamp())
    .execute(uow.writer()?)
    .await?;
    get_view(uow, name).await
}

/// Loads a view by name.
///
/// # Errors
///
/// Returns `NotFound` if it does not exist.
pub async fn get_view(uow: &mut UnitOfWork, name: &str) -> Result<ViewResource, CoreError> {
    let row = sqlx::query("SELECT id, name, query, updated_at FROM view_resources WHERE name = ?")
        .bind(name)
        .fetch_optional(uow.reader())
        .await?
        .ok_or_else(|| UserError::not_found("view resource", name))?;
    view_from_row(&row)
}

/// Every saved view, ordered by name.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_views(uow: &mut UnitOfWork) -> Result<Vec<ViewResource>, CoreError> {
    let rows = sqlx::query("SELECT id, name, query, updated_at FROM view_resources ORDER BY name")
        .fetch_all(uow.reader())
        .await?;
    rows.iter().map(view_from_row).collect()
}

/// Deletes a view by name.
///
/// # Errors
///
/// Returns `NotFound` if it does not exist.
pub async fn delete_view(uow: &mut UnitOfWork, name: &str) -> Result<(), CoreError> {
    let result = sqlx::query("DELETE FROM view_resources WHERE name = ?")
        .bind(name)
        .execute(uow.writer()?)
        .await?;
    if result.rows_affected() == 0 {
        return Err(UserError::not_found("view resource", name).into());
    }
    Ok(())
}
