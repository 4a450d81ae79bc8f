//! Apply repository (versioned).

use sqlx::sqlite::SqliteRow;

use super::rows;
use super::task::{self, id_column, TaskRecord, TaskTable};
use crate::domain::{Apply, ApplyId, ChangesetId, CoreError, PlanId, TaskState};
use crate::store::{schema::APPLIES, timestamp, UnitOfWork};

const COLUMNS: &str = "id, plan_id, changeset_id, state, created_at, updated_at";

impl TaskRecord for Apply {
    const TABLE: TaskTable = TaskTable {
        name: "applies",
        entity: "apply",
        columns: COLUMNS,
        versioned: true,
    };

    fn from_row(row: &SqliteRow) -> Result<Self, CoreError> {
        use sqlx::Row;

        Ok(Apply {
            id: ApplyId::new(id_column(row)?),
            plan_id: PlanId::new(row.try_get("plan_id")?),
            changeset_id: ChangesetId::new(row.try_get("changeset_id")?),
            state: rows::parsed(row, "state")?,
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

/// Inserts a queued apply.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn create(
    uow: &mut UnitOfWork,
    plan_id: PlanId,
    changeset_id: ChangesetId,
) -> Result<Apply, CoreError> {
    let id = uow.next_id(&APPLIES).await?;
    let branch = uow.branch().as_str().to_owned();
    let now = timestamp();
    sqlx::query(
        "INSERT INTO applies (branch, id, plan_id, changeset_id, state, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(branch)
    .bind(id)
    .bind(plan_id.get())
    .bind(changeset_id.get())
    .bind(TaskState::Queued.as_str())
    .bind(&now)
    .bind(&now)
    .execute(uow.writer()?)
    .await?;

    task::get(uow, id).await
}

/// Loads one apply.
///
/// # Errors
///
/// Returns `NotFound` if the apply is not on this branch.
pub async fn get(uow: &mut UnitOfWork, id: ApplyId) -> Result<Apply, CoreError> {
    task::get(uow, id.get()).await
}

/// Applies referencing `plan_id`.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_for_plan(uow: &mut UnitOfWork, plan_id: PlanId) -> Result<Vec<Apply>, CoreError> {
    task::select_where(uow, "plan_id = ?", &[plan_id.get()]).await
}

/// Returns true if `plan_id` has an apply that is queued, running or completed.
///
/// Failed applies do not count; retrying one means inserting a new row.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn has_live_apply(uow: &mut UnitOfWork, plan_id: PlanId) -> Result<bool, CoreError> {
    Ok(list_for_plan(uow, plan_id)
        .await?
        .iter()
        .any(|a| a.state != TaskState::Failed))
}
