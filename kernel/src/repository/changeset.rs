//! Changeset repository (global).

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::rows;
use crate::domain::{
    Changeset, ChangesetId, ChangesetState, CoreError, ReviewState, UserError,
};
use crate::store::{timestamp, UnitOfWork};

const SELECT: &str =
    "SELECT id, name, state, review_state, created_at, updated_at FROM changesets";

fn from_row(row: &SqliteRow) -> Result<Changeset, CoreError> {
    Ok(Changeset {
        id: ChangesetId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        state: rows::parsed(row, "state")?,
        review_state: rows::parsed(row, "review_state")?,
        created_at: rows::timestamp(row, "created_at")?,
        updated_at: rows::timestamp(row, "updated_at")?,
    })
}

/// Inserts an open, unreviewed changeset.
///
/// # Errors
///
/// Returns `ConflictingState` if the name is taken.
pub async fn create(uow: &mut UnitOfWork, name: &str) -> Result<Changeset, CoreError> {
    if find_by_name(uow, name).await?.is_some() {
        return Err(UserError::conflict(format!("changeset {name} already exists")).into());
    }
    let now = timestamp();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO changesets (name, state, review_state, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(ChangesetState::Open.as_str())
    .bind(ReviewState::Unreviewed.as_str())
    .bind(&now)
    .bind(&now)
    .fetch_one(uow.writer()?)
    .await?;

    get(uow, ChangesetId::new(id)).await
}

/// Loads a changeset by id.
///
/// # Errors
///
/// Returns `NotFound` if it does not exist.
pub async fn get(uow: &mut UnitOfWork, id: ChangesetId) -> Result<Changeset, CoreError> {
    let row = sqlx::query(&format!("{SELECT} WHERE id = ?"))
        .bind(id.get())
        .fetch_optional(uow.reader())
        .await?
        .ok_or_else(|| UserError::not_found("changeset", id.get()))?;
    from_row(&row)
}

/// Loads a changeset by name if it exists.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn find_by_name(uow: &mut UnitOfWork, name: &str) -> Result<Option<Changeset>, CoreError> {
    let row = sqlx::query(&format!("{SELECT} WHERE name = ?"))
        .bind(name)
        .fetch_optional(uow.reader())
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Loads a changeset by name.
///
/// # Errors
///
/// Returns `NotFound` if it does not exist.
pub async fn get_by_name(uow: &mut UnitOfWork, name: &str) -> Result<Changeset, CoreError> {
    find_by_name(uow, name)
        .await?
        .ok_or_else(|| UserError::not_found("changeset", name).into())
}

/// All changesets, optionally filtered by state, oldest first.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list(
    uow: &mut UnitOfWork,
    state: Option<ChangesetState>,
) -> Result<Vec<Changeset>, CoreError> {
    let rows = match state {
        Some(state) => {
            sqlx::query(&format!("{SELECT} WHERE state = ? ORDER BY id"))
                .bind(state.as_str())
                .fetch_all(uow.reader())
                .await?
        }
        None => {
            sqlx::query(&format!("{SELECT} ORDER BY id"))
                .fetch_all(uow.reader())
                .await?
        }
    };
    rows.iter().map(from_row).collect()
}

/// Moves a changeset to `next`, enforcing its state machine.
///
/// # Errors
///
/// Returns `ConflictingState` for an illegal transition.
pub async fn update_state(
    uow: &mut UnitOfWork,
    id: ChangesetId,
    next: ChangesetState,
) -> Result<Changeset, CoreError> {
    let current = get(uow, id).await?;
    if !current.state.can_transition_to(next) {
        return Err(UserError::conflict(format!(
            "changeset {} is {} and cannot become {next}",
            current.name, current.state
        ))
        .into());
    }
    sqlx::query("UPDATE changesets SET state = ?, updated_at = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(timestamp())
        .bind(id.get())
        .execute(uow.writer()?)
        .await?;
    get(uow, id).await
}

/// Sets the review state.
///
/// # Errors
///
/// Returns `NotFound` if the changeset does not exist.
pub async fn set_review_state(
    uow: &mut UnitOfWork,
    id: ChangesetId,
    review_state: ReviewState,
) -> Result<Changeset, CoreError> {
    let result = sqlx::query("UPDATE changesets SET review_state = ?, updated_at = ? WHERE id = ?")
        .bind(review_state.as_str())
        .bind(timestamp())
        .bind(id.get())
        .execute(uow.writer()?)
        .await?;
    if result.rows_affected() == 0 {
        return Err(UserError::not_found("changeset", id.get()).into());
    }
    get(uow, id).await
}
