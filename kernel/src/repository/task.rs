//! Capability set shared by task-shaped records.
//!
//! Plans, applies, merges and rebases share one lifecycle
//! (`queued -> running -> completed | failed`). Each implements
//! [`TaskRecord`]; the generic functions here provide get, list and
//! validated state transitions for all of them.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::domain::{BranchName, ChangesetId, CoreError, TaskState, UserError};
use crate::store::{timestamp, UnitOfWork};

/// Where a task-shaped record lives.
#[derive(Debug, Clone, Copy)]
pub struct TaskTable {
    /// Table name.
    pub name: &'static str,
    /// Entity name used in error messages.
    pub entity: &'static str,
    /// Column list for SELECTs.
    pub columns: &'static str,
    /// Whether rows are scoped to the unit-of-work branch.
    pub versioned: bool,
}

/// A record with the shared task lifecycle.
pub trait TaskRecord: Sized + Send {
    /// Table layout.
    const TABLE: TaskTable;

    /// Decodes a row selected with [`TaskTable::columns`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupt`] or a database error for undecodable rows.
    fn from_row(row: &SqliteRow) -> Result<Self, CoreError>;

    /// Raw identifier.
    fn raw_id(&self) -> i64;

    /// Current state.
    fn state(&self) -> TaskState;
}

fn select_sql(table: &TaskTable, filter: &str) -> String {
    if table.versioned {
        format!(
            "SELECT {} FROM {} WHERE branch = ? AND {filter} ORDER BY id",
            table.columns, table.name
        )
    } else {
        format!(
            "SELECT {} FROM {} WHERE {filter} ORDER BY id",
            table.columns, table.name
        )
    }
}

/// Records matching `filter`, whose `?` placeholders take `binds` in order.
pub(crate) async fn select_where<R: TaskRecord>(
    uow: &mut UnitOfWork,
    filter: &str,
    binds: &[i64],
) -> Result<Vec<R>, CoreError> {
    let branch = uow.branch().clone();
    select_on(uow, &branch, filter, binds).await
}

/// Like [`select_where`], but reads versioned rows of `branch` instead of
/// the unit-of-work branch.
async fn select_on<R: TaskRecord>(
    uow: &mut UnitOfWork,
    branch: &BranchName,
    filter: &str,
    binds: &[i64],
) -> Result<Vec<R>, CoreError> {
    let sql = select_sql(&R::TABLE, filter);
    let branch = branch.as_str().to_owned();
    let mut query = sqlx::query(&sql);
    if R::TABLE.versioned {
        query = query.bind(branch);
    }
    for value in binds {
        query = query.bind(*value);
    }
    let rows = query.fetch_all(uow.reader()).await?;
    rows.iter().map(R::from_row).collect()
}

/// Loads a record by id.
///
/// # Errors
///
/// Returns [`UserError::NotFound`] if no such row exists on the branch.
pub async fn get<R: TaskRecord>(uow: &mut UnitOfWork, id: i64) -> Result<R, CoreError> {
    find(uow, id)
        .await?
        .ok_or_else(|| UserError::not_found(R::TABLE.entity, id).into())
}

/// Loads a record by id if it exists.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn find<R: TaskRecord>(uow: &mut UnitOfWork, id: i64) -> Result<Option<R>, CoreError> {
    Ok(select_where::<R>(uow, "id = ?", &[id])
        .await?
        .into_iter()
        .next())
}

/// Every record, optionally filtered by state, oldest first.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list<R: TaskRecord>(
    uow: &mut UnitOfWork,
    state: Option<TaskState>,
) -> Result<Vec<R>, CoreError> {
    let filter = match state {
        Some(state) => format!("state = '{}'", state.as_str()),
        None => "1 = 1".to_string(),
    };
    select_where(uow, &filter, &[]).await
}

/// Records belonging to one changeset, oldest first.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_for_changeset<R: TaskRecord>(
    uow: &mut UnitOfWork,
    changeset_id: ChangesetId,
) -> Result<Vec<R>, CoreError> {
    select_where(uow, "changeset_id = ?", &[changeset_id.get()]).await
}

/// Number of queued or running records of one changeset.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn count_in_flight<R: TaskRecord>(
    uow: &mut UnitOfWork,
    changeset_id: ChangesetId,
) -> Result<usize, CoreError> {
    let branch = uow.branch().clone();
    count_in_flight_on::<R>(uow, &branch, changeset_id).await
}

/// Number of queued or running records of one changeset on `branch`.
///
/// Lets a transaction on trunk inspect work living on a changeset branch
/// while holding the write gate.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn count_in_flight_on<R: TaskRecord>(
    uow: &mut UnitOfWork,
    branch: &BranchName,
    changeset_id: ChangesetId,
) -> Result<usize, CoreError> {
    let records: Vec<R> = select_on(uow, branch, "changeset_id = ?", &[changeset_id.get()]).await?;
    Ok(records.iter().filter(|r| r.state().is_in_flight()).count())
}

/// Moves a record to `next`, enforcing the task state machine.
///
/// # Errors
///
/// Returns [`UserError::ConflictingState`] for an illegal transition and
/// [`UserError::NotFound`] for a missing record.
pub async fn update_state<R: TaskRecord>(
    uow: &mut UnitOfWork,
    id: i64,
    next: TaskState,
) -> Result<R, CoreError> {
    let current: R = get(uow, id).await?;
    if !current.state().can_transition_to(next) {
        return Err(UserError::conflict(format!(
            "{} {id} cannot move from {} to {next}",
            R::TABLE.entity,
            current.state()
        ))
        .into());
    }

    let branch = uow.branch().as_str().to_owned();
    let sql = if R::TABLE.versioned {
        format!(
            "UPDATE {} SET state = ?, updated_at = ? WHERE id = ? AND branch = ?",
            R::TABLE.name
        )
    } else {
        format!(
            "UPDATE {} SET state = ?, updated_at = ? WHERE id = ?",
            R::TABLE.name
        )
    };
    let mut query = sqlx::query(&sql).bind(next.as_str()).bind(timestamp()).bind(id);
    if R::TABLE.versioned {
        query = query.bind(branch);
    }
    query.execute(uow.writer()?).await?;

    get(uow, id).await
}

/// Reads the `id` column.
pub(crate) fn id_column(row: &SqliteRow) -> Result<i64, CoreError> {
    Ok(row.try_get("id")?)
}
