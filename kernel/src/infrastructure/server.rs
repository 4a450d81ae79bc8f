use std::future::Future;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

use crate::api;
use crate::app::AppState;
use crate::infrastructure::config::Settings;

async fn health_check() -> &'static str {
    "OK"
}

/// Installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

/// Health probes, the metrics endpoint when a recorder is installed, and
/// the REST API.
pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let mut control_plane = Router::new()
        .route("/health/live", get(health_check))
        .route("/health/ready", get(health_check));
    if let Some(handle) = metrics {
        control_plane =
            control_plane.route("/metrics", get(move || std::future::ready(handle.render())));
    }

    control_plane.merge(api::routes().with_state(state))
}

/// Serves the control plane until `shutdown` resolves. In-flight requests
/// are allowed to finish.
///
/// # Errors
///
/// Returns an error if the address is invalid, the port cannot be bound,
/// or the server fails while running.
pub async fn run_server(
    config: &Settings,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = config.bind_address().to_socket_addr()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Control Plane listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MemoryBlobStore, TofuExecutor, WorkspaceManager};
    use crate::store::VersionedStore;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_and_api_share_one_router() -> anyhow::Result<()> {
        let store = VersionedStore::connect("sqlite::memory:", 1).await?;
        let workdir = tempfile::tempdir()?;
        let (state, _wakes) = AppState::new(
            store,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(TofuExecutor::new("tofu")),
            WorkspaceManager::new(workdir.path()),
            4,
        );
        let app = router(state, None);

        let response = app
            .clone()
            .oneshot(Request::get("/health/live").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.into_body().collect().await?.to_bytes(), "OK");

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/changesets").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
