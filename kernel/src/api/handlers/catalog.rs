//! Module, resource and view handlers. All of these live on trunk.

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
};

use crate::api::types::{CreateModuleRequest, CreateModuleVersionRequest, SaveViewRequest};
use crate::api::ApiError;
use crate::app::AppState;
use crate::domain::{Module, ModuleId, ModuleVersion, Resource, ViewResource};
use crate::repository::{ReconcileBatch, ReconcileReport};

/// POST /api/v1/modules
pub async fn create_module(
    State(state): State<AppState>,
    body: Result<Json<CreateModuleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Module>), ApiError> {
    let Json(req) = body?;
    let module = state.catalog().create_module(&req.name, &req.source).await?;
    Ok((StatusCode::CREATED, Json(module)))
}

/// GET /api/v1/modules
pub async fn list_modules(State(state): State<AppState>) -> Result<Json<Vec<Module>>, ApiError> {
    Ok(Json(state.catalog().list_modules().await?))
}

/// GET /api/v1/modules/{id}
pub async fn get_module(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Module>, ApiError> {
    Ok(Json(state.catalog().get_module(ModuleId::new(id)).await?))
}

/// POST /api/v1/modules/{id}/versions
pub async fn create_module_version(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<CreateModuleVersionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ModuleVersion>), ApiError> {
    let Json(req) = body?;
    let version = state
        .catalog()
        .create_module_version(ModuleId::new(id), &req.version)
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// GET /api/v1/modules/{id}/versions
pub async fn list_module_versions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ModuleVersion>>, ApiError> {
    Ok(Json(
        state
            .catalog()
            .list_module_versions(ModuleId::new(id))
            .await?,
    ))
}

/// GET /api/v1/resources
pub async fn list_resources(State(state): State<AppState>) -> Result<Json<Vec<Resource>>, ApiError> {
    Ok(Json(state.catalog().list_resources().await?))
}

/// POST /api/v1/resources/reconcile
pub async fn reconcile_resources(
    State(state): State<AppState>,
    body: Result<Json<ReconcileBatch>, JsonRejection>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let Json(batch) = body?;
    Ok(Json(state.catalog().reconcile_resources(batch).await?))
}

/// POST /api/v1/views
pub async fn save_view(
    State(state): State<AppState>,
    body: Result<Json<SaveViewRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ViewResource>), ApiError> {
    let Json(req) = body?;
    let view = state.catalog().save_view(&req.name, req.query).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/views
pub async fn list_views(State(state): State<AppState>) -> Result<Json<Vec<ViewResource>>, ApiError> {
    Ok(Json(state.catalog().list_views().await?))
}

/// GET /api/v1/views/{name}
pub async fn get_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ViewResource>, ApiError> {
    Ok(Json(state.catalog().get_view(&name).await?))
}

/// DELETE /api/v1/views/{name}
pub async fn delete_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog().delete_view(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/views/{name}/resources
pub async fn evaluate_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Resource>>, ApiError> {
    Ok(Json(state.catalog().evaluate_view(&name).await?))
}
