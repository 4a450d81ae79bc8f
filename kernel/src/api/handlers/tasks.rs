//! Plan and apply handlers. Creating a task only queues it; the workers
//! pick it up.

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;

use crate::api::types::ListPlansQuery;
use crate::api::ApiError;
use crate::app::AppState;
use crate::domain::{Apply, ApplyId, ComponentId, Plan, PlanId};

fn text(body: Bytes) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

/// POST /api/v1/changesets/{name}/components/{id}/plans
pub async fn create_plan(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<(StatusCode, Json<Plan>), ApiError> {
    let plan = state
        .pipeline()
        .create_plan(ComponentId::new(id), &name)
        .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// GET /api/v1/changesets/{name}/components/{id}/plans
pub async fn list_component_plans(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<Vec<Plan>>, ApiError> {
    let plans = state
        .pipeline()
        .list_plans(&name, Some(ComponentId::new(id)))
        .await?;
    Ok(Json(plans))
}

/// GET /api/v1/changesets/{name}/plans
pub async fn list_plans(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListPlansQuery>,
) -> Result<Json<Vec<Plan>>, ApiError> {
    Ok(Json(
        state.pipeline().list_plans(&name, query.component_id).await?,
    ))
}

/// GET /api/v1/changesets/{name}/plans/{id}
pub async fn get_plan(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<Plan>, ApiError> {
    Ok(Json(state.pipeline().get_plan(&name, PlanId::new(id)).await?))
}

/// GET /api/v1/changesets/{name}/plans/{id}/logs
pub async fn plan_logs(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let log = state.pipeline().plan_log(&name, PlanId::new(id)).await?;
    Ok(text(log))
}

/// POST /api/v1/changesets/{name}/plans/{id}/applies
pub async fn create_apply(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<(StatusCode, Json<Apply>), ApiError> {
    let apply = state.pipeline().create_apply(PlanId::new(id), &name).await?;
    Ok((StatusCode::CREATED, Json(apply)))
}

/// GET /api/v1/changesets/{name}/applies
pub async fn list_applies(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Apply>>, ApiError> {
    Ok(Json(state.pipeline().list_applies(&name).await?))
}

/// GET /api/v1/changesets/{name}/applies/{id}
pub async fn get_apply(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<Apply>, ApiError> {
    Ok(Json(state.pipeline().get_apply(&name, ApplyId::new(id)).await?))
}

/// GET /api/v1/changesets/{name}/applies/{id}/logs
pub async fn apply_logs(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let log = state.pipeline().apply_log(&name, ApplyId::new(id)).await?;
    Ok(text(log))
}
