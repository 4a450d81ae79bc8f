//! Merge and rebase attempt repositories (global).
//!
//! Both record one attempt per row and allow at most one in-flight attempt
//! per changeset.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::rows;
use super::task::{self, id_column, TaskRecord, TaskTable};
use crate::domain::{ChangesetId, CoreError, Merge, MergeId, Rebase, RebaseId, TaskState};
use crate::store::{timestamp, UnitOfWork};

const COLUMNS: &str = "id, changeset_id, state, error, created_at, updated_at";

/// Shared shape of merge and rebase attempts.
pub trait Attempt: TaskRecord {
    /// Changeset the attempt integrates.
    fn changeset_id(&self) -> ChangesetId;
}

impl TaskRecord for Merge {
    const TABLE: TaskTable = TaskTable {
        name: "merges",
        entity: "merge",
        columns: COLUMNS,
        versioned: false,
    };

    fn from_row(row: &SqliteRow) -> Result<Self, CoreError> {
        Ok(Merge {
            id: MergeId::new(id_column(row)?),
            changeset_id: ChangesetId::new(row.try_get("changeset_id")?),
            state: rows::parsed(row, "state")?,
            error: row.try_get("error")?,
            created_at: rows::timestamp(row, "created_at")?,
            updated_at: rows::timestamp(row, "updated_at")?,
        })
    }

    fn raw_id(&self) -> i64 {
        self.id.get()
    }

    fn state(&self) -> TaskState {
        self.state
    }
}

impl Attempt for Merge {
    fn changeset_id(&self) -> ChangesetId {
        self.changeset_id
    }
}

impl TaskRecord for Rebase {
    const TABLE: TaskTable = TaskTable {
        name: "rebases",
        entity: "rebase",
        columns: COLUMNS,
        versioned: false,
    };

    fn from_row(row: &SqliteRow) -> Result<Self, CoreError> {
        Ok(Rebase {
            id: RebaseId::new(id_column(row)?),
            changeset_id: ChangesetId::new(row.try_get("changeset_id")?),
            state: rows::parsed(row, "state")?,
            error: row.try_get("error")?,
            created_at: rows::timestamp(row, "created_at")?,
            updated_at: rows::timestamp(row, "updated_at")?,
        })
    }

    fn raw_id(&self) -> i64 {
        self.id.get()
    }

    fn state(&self) -> TaskState {
        self.state
    }
}

impl Attempt for Rebase {
    fn changeset_id(&self) -> ChangesetId {
        self.changeset_id
    }
}

/// Inserts a queued attempt.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn create<A: Attempt>(
    uow: &mut UnitOfWork,
    changeset_id: ChangesetId,
) -> Result<A, CoreError> {
    let now = timestamp();
    let id: i64 = sqlx::query_scalar(&format!(
        "INSERT INTO {} (changeset_id, state, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        A::TABLE.name
    ))
    .bind(changeset_id.get())
    .bind(TaskState::Queued.as_str())
    .bind(&now)
    .bind(&now)
    .fetch_one(uow.writer()?)
    .await?;

    task::get(uow, id).await
}

/// Moves a running attempt to `failed` and records why.
///
/// # Errors
///
/// Returns `ConflictingState` unless the attempt is running.
pub async fn fail<A: Attempt>(uow: &mut UnitOfWork, id: i64, error: &str) -> Result<A, CoreError> {
    sqlx::query(&format!(
        "UPDATE {} SET error = ? WHERE id = ?",
        A::TABLE.name
    ))
    .bind(error)
    .bind(id)
    .execute(uow.writer()?)
    .await?;

    task::update_state(uow, id, TaskState::Failed).await
}

/// Returns true if the changeset has a queued or running attempt.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn has_in_flight<A: Attempt>(
    uow: &mut UnitOfWork,
    changeset_id: ChangesetId,
) -> Result<bool, CoreError> {
    Ok(task::count_in_flight::<A>(uow, changeset_id).await? > 0)
}
