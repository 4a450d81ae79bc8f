//! Plan repository (versioned).

use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;

use super::rows;
use super::task::{self, id_column, TaskRecord, TaskTable};
use crate::domain::{
    ChangeSummary, ChangesetId, ComponentId, CoreError, Plan, PlanId, TaskState,
};
use crate::store::{schema::PLANS, timestamp, UnitOfWork};

const COLUMNS: &str = "id, component_id, changeset_id, state, from_version, to_version, \
                       add_count, change_count, destroy_count, created_at, updated_at";

impl TaskRecord for Plan {
    const TABLE: TaskTable = TaskTable {
        name: "plans",
        entity: "plan",
        columns: COLUMNS,
        versioned: true,
    };

    fn from_row(row: &SqliteRow) -> Result<Self, CoreError> {
        use sqlx::Row;

        let summary = match (
            rows::count(row, "add_count")?,
            rows::count(row, "change_count")?,
            rows::count(row, "destroy_count")?,
        ) {
            (Some(add), Some(change), Some(destroy)) => Some(ChangeSummary {
                add,
                change,
                destroy,
            }),
            _ => None,
        };

        Ok(Plan {
            id: PlanId::new(id_column(row)?),
            component_id: ComponentId::new(row.try_get("component_id")?),
            changeset_id: ChangesetId::new(row.try_get("changeset_id")?),
            state: rows::parsed(row, "state")?,
            from_version: row.try_get("from_version")?,
            to_version: row.try_get("to_version")?,
            summary,
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

/// Outcome of a successful plan execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanResult {
    /// Version recorded on the component state before the plan.
    pub from_version: Option<String>,
    /// Module version planned.
    pub to_version: Option<String>,
    /// Change counts.
    pub summary: ChangeSummary,
}

/// Inserts a queued plan.
///
/// # Errors
///
/// Returns an error outside a transaction or on database failure.
pub async fn create(
    uow: &mut UnitOfWork,
    component_id: ComponentId,
    changeset_id: ChangesetId,
) -> Result<Plan, CoreError> {
    let id = uow.next_id(&PLANS).await?;
    let branch = uow.branch().as_str().to_owned();
    let now = timestamp();
    sqlx::query(
        "INSERT INTO plans (branch, id, component_id, changeset_id, state, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(branch)
    .bind(id)
    .bind(component_id.get())
    .bind(changeset_id.get())
    .bind(TaskState::Queued.as_str())
    .bind(&now)
    .bind(&now)
    .execute(uow.writer()?)
    .await?;

    task::get(uow, id).await
}

/// Loads one plan.
///
/// # Errors
///
/// Returns `NotFound` if the plan is not on this branch.
pub async fn get(uow: &mut UnitOfWork, id: PlanId) -> Result<Plan, CoreError> {
    task::get(uow, id.get()).await
}

/// Plans of one component within one changeset.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_for_component(
    uow: &mut UnitOfWork,
    component_id: ComponentId,
    changeset_id: ChangesetId,
) -> Result<Vec<Plan>, CoreError> {
    task::select_where(
        uow,
        "component_id = ? AND changeset_id = ?",
        &[component_id.get(), changeset_id.get()],
    )
    .await
}

/// Records a successful execution and moves the plan to `completed`.
///
/// # Errors
///
/// Returns `ConflictingState` unless the plan is running.
pub async fn complete(
    uow: &mut UnitOfWork,
    id: PlanId,
    result: &PlanResult,
) -> Result<Plan, CoreError> {
    let branch = uow.branch().as_str().to_owned();
    sqlx::query(
        "UPDATE plans SET from_version = ?, to_version = ?, add_count = ?, change_count = ?, destroy_count = ?
         WHERE branch = ? AND id = ? AND state = ?",
    )
    .bind(&result.from_version)
    .bind(&result.to_version)
    .bind(i64::from(result.summary.add))
    .bind(i64::from(result.summary.change))
    .bind(i64::from(result.summary.destroy))
    .bind(branch)
    .bind(id.get())
    .bind(TaskState::Running.as_str())
    .execute(uow.writer()?)
    .await?;

    task::update_state(uow, id.get(), TaskState::Completed).await
}

/// Newest plan of every component the changeset planned, for components
/// whose newest plan completed. A component whose latest plan failed or is
/// still pending is left out even if an older plan completed.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn latest_completed_per_component(
    uow: &mut UnitOfWork,
    changeset_id: ChangesetId,
) -> Result<Vec<Plan>, CoreError> {
    let plans: Vec<Plan> = task::list_for_changeset(uow, changeset_id).await?;
    let mut latest: BTreeMap<ComponentId, Plan> = BTreeMap::new();
    for plan in plans {
        latest.insert(plan.component_id, plan);
    }
    Ok(latest
        .into_values()
        .filter(|p| p.state == TaskState::Completed)
        .collect())
}
