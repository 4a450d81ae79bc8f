//! Changeset lifecycle handlers.

use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    http::StatusCode,
};

use crate::api::types::{CreateChangesetRequest, HistoryQuery, ListChangesetsQuery, ReviewRequest};
use crate::api::ApiError;
use crate::app::AppState;
use crate::domain::Changeset;
use crate::store::{Commit, RowChange};

/// POST /api/v1/changesets
pub async fn create_changeset(
    State(state): State<AppState>,
    body: Result<Json<CreateChangesetRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Changeset>), ApiError> {
    let Json(req) = body?;
    let changeset = state.changesets().create(&req.name).await?;
    Ok((StatusCode::CREATED, Json(changeset)))
}

/// GET /api/v1/changesets
pub async fn list_changesets(
    State(state): State<AppState>,
    Query(query): Query<ListChangesetsQuery>,
) -> Result<Json<Vec<Changeset>>, ApiError> {
    Ok(Json(state.changesets().list(query.state).await?))
}

/// GET /api/v1/changesets/{name}
pub async fn get_changeset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Changeset>, ApiError> {
    Ok(Json(state.changesets().get(&name).await?))
}

/// PUT /api/v1/changesets/{name}/review
pub async fn review_changeset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<Changeset>, ApiError> {
    let Json(req) = body?;
    Ok(Json(
        state
            .changesets()
            .set_review_state(&name, req.review_state)
            .await?,
    ))
}

/// POST /api/v1/changesets/{name}/close
///
/// Abandons the changeset and deletes its branch.
pub async fn close_changeset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Changeset>, ApiError> {
    Ok(Json(state.changesets().close(&name).await?))
}

/// GET /api/v1/changesets/{name}/diff
pub async fn changeset_diff(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<RowChange>>, ApiError> {
    Ok(Json(state.changesets().diff(&name).await?))
}

/// GET /api/v1/changesets/{name}/history
pub async fn changeset_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Commit>>, ApiError> {
    Ok(Json(state.changesets().history(&name, query.limit).await?))
}
