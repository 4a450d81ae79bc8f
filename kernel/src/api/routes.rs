//! Route table of the REST API.

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::{catalog, changesets, components, integration, tasks};
use crate::app::AppState;

/// API routes mounted at `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/changesets",
            post(changesets::create_changeset).get(changesets::list_changesets),
        )
        .route("/api/v1/changesets/{name}", get(changesets::get_changeset))
        .route(
            "/api/v1/changesets/{name}/review",
            put(changesets::review_changeset),
        )
        .route(
            "/api/v1/changesets/{name}/close",
            post(changesets::close_changeset),
        )
        .route("/api/v1/changesets/{name}/diff", get(changesets::changeset_diff))
        .route(
            "/api/v1/changesets/{name}/history",
            get(changesets::changeset_history),
        )
        .route(
            "/api/v1/changesets/{name}/components",
            post(components::create_component).get(components::list_components),
        )
        .route(
            "/api/v1/changesets/{name}/components/{id}",
            get(components::get_component).patch(components::update_component),
        )
        .route(
            "/api/v1/changesets/{name}/components/{id}/state",
            get(components::component_state),
        )
        .route(
            "/api/v1/changesets/{name}/components/{id}/plans",
            post(tasks::create_plan).get(tasks::list_component_plans),
        )
        .route("/api/v1/changesets/{name}/plans", get(tasks::list_plans))
        .route("/api/v1/changesets/{name}/plans/{id}", get(tasks::get_plan))
        .route(
            "/api/v1/changesets/{name}/plans/{id}/logs",
            get(tasks::plan_logs),
        )
        .route(
            "/api/v1/changesets/{name}/plans/{id}/applies",
            post(tasks::create_apply),
        )
        .route("/api/v1/changesets/{name}/applies", get(tasks::list_applies))
        .route(
            "/api/v1/changesets/{name}/applies/{id}",
            get(tasks::get_apply),
        )
        .route(
            "/api/v1/changesets/{name}/applies/{id}/logs",
            get(tasks::apply_logs),
        )
        .route(
            "/api/v1/changesets/{name}/merge",
            post(integration::merge_changeset),
        )
        .route(
            "/api/v1/changesets/{name}/merges",
            get(integration::list_merges),
        )
        .route(
            "/api/v1/changesets/{name}/merges/{id}",
            get(integration::get_merge),
        )
        .route(
            "/api/v1/changesets/{name}/rebases",
            post(integration::rebase_changeset).get(integration::list_rebases),
        )
        .route(
            "/api/v1/changesets/{name}/rebases/{id}",
            get(integration::get_rebase),
        )
        .route("/api/v1/components", get(components::list_trunk_components))
        .route(
            "/api/v1/components/{id}",
            get(components::get_trunk_component),
        )
        .route(
            "/api/v1/components/{id}/state",
            get(components::trunk_component_state),
        )
        .route(
            "/api/v1/modules",
            post(catalog::create_module).get(catalog::list_modules),
        )
        .route("/api/v1/modules/{id}", get(catalog::get_module))
        .route(
            "/api/v1/modules/{id}/versions",
            post(catalog::create_module_version).get(catalog::list_module_versions),
        )
        .route("/api/v1/resources", get(catalog::list_resources))
        .route(
            "/api/v1/resources/reconcile",
            post(catalog::reconcile_resources),
        )
        .route(
            "/api/v1/views",
            post(catalog::save_view).get(catalog::list_views),
        )
        .route(
            "/api/v1/views/{name}",
            get(catalog::get_view).delete(catalog::delete_view),
        )
        .route(
            "/api/v1/views/{name}/resources",
            get(catalog::evaluate_view),
        )
}
