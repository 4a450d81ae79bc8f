//! Component state and state resource repositories (versioned).
//!
//! Writes are upserts: one state per component, one resource per
//! `(state, address)`. Re-applying identical results leaves the same rows.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::rows;
use crate::domain::{
    AppliedResource, ComponentId, CoreError, State, StateId, StateResource, StateResourceId,
    UserError,
};
use crate::store::{
    schema::{STATES, STATE_RESOURCES},
    timestamp, UnitOfWork,
};

fn state_from_row(row: &SqliteRow) -> Result<State, CoreError> {
    Ok(State {
        id: StateId::new(row.try_get("id")?),
        component_id: ComponentId::new(row.try_get("component_id")?),
        version: row.try_get("version")?,
        serial: row.try_get("serial")?,
        updated_at: rows::timestamp(row, "updated_at")?,
    })
}

fn resource_from_row(row: &SqliteRow) -> Result<StateResource, CoreError> {
    Ok(StateResource {
        id: StateResourceId::new(row.try_get("id")?),
        state_id: StateId::new(row.try_get("state_id")?),
        address: row.try_get("address")?,
        resource_type: row.try_get("resource_type")?,
        name: row.try_get("name")?,
        attributes: rows::json(row, "attributes")?,
    })
}

/// State of a component, if it was ever applied on this branch.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn find_for_component(
    uow: &mut UnitOfWork,
    component_id: ComponentId,
) -> Result<Option<State>, CoreError> {
    let branch = uow.branch().as_str().to_owned();
    let row = sqlx::query(
        "SELECT id, component_id, version, serial, updated_at FROM states
         WHERE branch = ? AND component_id = ?",
    )
    .bind(branch)
    .bind(component_id.get())
    .fetch_optional(uow.reader())
    .await?;
    row.as_ref().map(state_from_row).transpose()
}

/// Inserts or updates the state of a component.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn upsert(
    uow: &mut UnitOfWork,
    component_id: ComponentId,
    version: Option<&str>,
) -> Result<State, CoreError> {
    let id = uow.next_id(&STATES).await?;
    let branch = uow.branch().as_str().to_owned();
    sqlx::query(
        "INSERT INTO states (branch, id, component_id, version, serial, updated_at)
         VALUES (?, ?, ?, ?, 1, ?)
         ON CONFLICT (branch, component_id) DO UPDATE SET
             version = excluded.version,
             serial = states.serial + 1,
             updated_at = excluded.updated_at",
    )
    .bind(branch)
    .bind(id)
    .bind(component_id.get())
    .bind(version)
    .bind(timestamp())
    .execute(uow.writer()?)
    .await?;

    find_for_component(uow, component_id).await?.ok_or_else(|| {
        CoreError::Corrupt(format!("state for component {component_id} vanished after upsert"))
    })
}

/// Resources recorded in a state, ordered by address.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_resources(
    uow: &mut UnitOfWork,
    state_id: StateId,
) -> Result<Vec<StateResource>, CoreError> {
    let branch = uow.branch().as_str().to_owned();
    let rows = sqlx::query(
        "SELECT id, state_id, address, resource_type, name, attributes FROM state_resources
         WHERE branch = ? AND state_id = ? ORDER BY address",
    )
    .bind(branch)
    .bind(state_id.get())
    .fetch_all(uow.reader())
    .await?;
    rows.iter().map(resource_from_row).collect()
}

/// Inserts or updates one resource of a state, keyed by address.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn upsert_resource(
    uow: &mut UnitOfWork,
    state_id: StateId,
    resource: &AppliedResource,
) -> Result<(), CoreError> {
    if resource.address.is_empty() {
        return Err(UserError::invalid("resource address must not be empty").into());
    }
    let id = uow.next_id(&STATE_RESOURCES).await?;
    let branch = uow.branch().as_str().to_owned();
    sqlx::query(
        "INSERT INTO state_resources (branch, id, state_id, address, resource_type, name, attributes)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (branch, state_id, address) DO UPDATE SET
             resource_type = excluded.resource_type,
             name = excluded.name,
             attributes = excluded.attributes",
    )
    .bind(branch)
    .bind(id)
    .bind(state_id.get())
    .bind(&resource.address)
    .bind(&resource.resource_type)
    .bind(&resource.name)
    .bind(serde_json::to_string(&resource.attributes)?)
    .execute(uow.writer()?)
    .await?;
    Ok(())
}

/// Deletes resources of a state whose address is not in `keep`.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn prune_resources(
    uow: &mut UnitOfWork,
    state_id: StateId,
    keep: &[&str],
) -> Result<usize, CoreError> {
    let stale: Vec<StateResource> = list_resources(uow, state_id)
        .await?
        .into_iter()
        .filter(|r| !keep.contains(&r.address.as_str()))
        .collect();

    let branch = uow.branch().as_str().to_owned();
    for resource in &stale {
        sqlx::query("DELETE FROM state_resources WHERE branch = ? AND id = ?")
            .bind(&branch)
            .bind(resource.id.get())
            .execute(uow.writer()?)
            .await?;
    }
    Ok(stale.len())
}
