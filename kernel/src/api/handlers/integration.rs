//! Merge and rebase handlers. Both run inline and answer with the
//! terminal attempt, which may be `failed`.

use axum::extract::{Json, Path, State};

use crate::api::ApiError;
use crate::app::AppState;
use crate::domain::{Merge, MergeId, Rebase, RebaseId};
use crate::integration::RebaseReport;

/// POST /api/v1/changesets/{name}/merge
pub async fn merge_changeset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Merge>, ApiError> {
    Ok(Json(state.engine().merge(&name).await?))
}

/// GET /api/v1/changesets/{name}/merges
pub async fn list_merges(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Merge>>, ApiError> {
    Ok(Json(state.engine().list_merges(&name).await?))
}

/// GET /api/v1/changesets/{name}/merges/{id}
pub async fn get_merge(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<Merge>, ApiError> {
    Ok(Json(state.engine().get_merge(&name, MergeId::new(id)).await?))
}

/// POST /api/v1/changesets/{name}/rebases
pub async fn rebase_changeset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RebaseReport>, ApiError> {
    Ok(Json(state.engine().rebase(&name).await?))
}

/// GET /api/v1/changesets/{name}/rebases
pub async fn list_rebases(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Rebase>>, ApiError> {
    Ok(Json(state.engine().list_rebases(&name).await?))
}

/// GET /api/v1/changesets/{name}/rebases/{id}
pub async fn get_rebase(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<Rebase>, ApiError> {
    Ok(Json(state.engine().get_rebase(&name, RebaseId::new(id)).await?))
}
