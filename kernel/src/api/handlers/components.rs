//! Component handlers, on a changeset branch or on trunk.

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
};

use crate::api::ApiError;
use crate::app::AppState;
use crate::catalog::ComponentState;
use crate::domain::{Component, ComponentId};
use crate::repository::{ComponentChanges, NewComponent};

/// POST /api/v1/changesets/{name}/components
pub async fn create_component(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<NewComponent>, JsonRejection>,
) -> Result<(StatusCode, Json<Component>), ApiError> {
    let Json(req) = body?;
    let component = state.catalog().create_component(&name, req).await?;
    Ok((StatusCode::CREATED, Json(component)))
}

/// GET /api/v1/changesets/{name}/components
pub async fn list_components(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Component>>, ApiError> {
    Ok(Json(state.catalog().list_components(Some(&name)).await?))
}

/// GET /api/v1/changesets/{name}/components/{id}
pub async fn get_component(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<Component>, ApiError> {
    let id = ComponentId::new(id);
    Ok(Json(state.catalog().get_component(Some(&name), id).await?))
}

/// PATCH /api/v1/changesets/{name}/components/{id}
pub async fn update_component(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
    body: Result<Json<ComponentChanges>, JsonRejection>,
) -> Result<Json<Component>, ApiError> {
    let Json(changes) = body?;
    let component = state
        .catalog()
        .update_component(&name, ComponentId::new(id), changes)
        .await?;
    Ok(Json(component))
}

/// GET /api/v1/changesets/{name}/components/{id}/state
pub async fn component_state(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<ComponentState>, ApiError> {
    let id = ComponentId::new(id);
    Ok(Json(state.catalog().component_state(Some(&name), id).await?))
}

/// GET /api/v1/components
pub async fn list_trunk_components(
    State(state): State<AppState>,
) -> Result<Json<Vec<Component>>, ApiError> {
    Ok(Json(state.catalog().list_components(None).await?))
}

/// GET /api/v1/components/{id}
pub async fn get_trunk_component(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Component>, ApiError> {
    Ok(Json(
        state
            .catalog()
            .get_component(None, ComponentId::new(id))
            .await?,
    ))
}

/// GET /api/v1/components/{id}/state
pub async fn trunk_component_state(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ComponentState>, ApiError> {
    Ok(Json(
        state
            .catalog()
            .component_state(None, ComponentId::new(id))
            .await?,
    ))
}
