use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::routes;
use crate::app::AppState;
use crate::domain::{AppliedResource, BranchName, ChangeSummary, PlanId, ApplyId};
use crate::pipeline::{
    ApplyOutput, Executor, ExecutorError, LogSink, MemoryBlobStore, PlanOutput, WorkspaceManager,
};
use crate::store::VersionedStore;

struct OneBucket;

#[async_trait]
impl Executor for OneBucket {
    async fn plan(&self, _workdir: &Path, log: LogSink) -> Result<PlanOutput, ExecutorError> {
        log.send("Plan: 1 to add, 0 to change, 0 to destroy.".into())
            .await
            .ok();
        Ok(PlanOutput {
            artifact: Bytes::from_static(b"plan"),
            summary: ChangeSummary {
                add: 1,
                change: 0,
                destroy: 0,
            },
        })
    }

    async fn apply(
        &self,
        _workdir: &Path,
        _artifact: Bytes,
        log: LogSink,
    ) -> Result<ApplyOutput, ExecutorError> {
        log.send("Apply complete!".into()).await.ok();
        Ok(ApplyOutput {
            resources: vec![AppliedResource {
                address: "module.web.aws_s3_bucket.logs".into(),
                resource_type: "aws_s3_bucket".into(),
                name: "logs".into(),
                attributes: json!({ "bucket": "logs" }),
            }],
        })
    }
}

struct Harness {
    state: AppState,
    app: Router,
    _workdir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Result<Self> {
        let store = VersionedStore::connect("sqlite::memory:", 1).await?;
        let workdir = tempfile::tempdir()?;
        let (state, _wakes) = AppState::new(
            store,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(OneBucket),
            WorkspaceManager::new(workdir.path()),
            8,
        );
        let app = routes().with_state(state.clone());
        Ok(Self {
            state,
            app,
            _workdir: workdir,
        })
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Bytes)> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&json)?))?,
            None => builder.body(Body::empty())?,
        };
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok((status, bytes))
    }

    async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let (status, bytes) = self.send(method, uri, body).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }
}

#[tokio::test]
async fn changeset_errors_use_message_bodies() -> Result<()> {
    let h = Harness::new().await?;

    let (status, body) = h
        .json(Method::POST, "/api/v1/changesets", Some(json!({ "name": "feat-1" })))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "open");

    let (status, body) = h
        .json(Method::POST, "/api/v1/changesets", Some(json!({ "name": "feat-1" })))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("feat-1"));

    let (status, body) = h.json(Method::GET, "/api/v1/changesets/nope", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].is_string());

    let (status, body) = h
        .json(Method::POST, "/api/v1/changesets", Some(json!({ "title": "x" })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, _) = h
        .json(Method::POST, "/api/v1/changesets", Some(json!({ "name": "main" })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn review_and_close() -> Result<()> {
    let h = Harness::new().await?;
    h.send(Method::POST, "/api/v1/changesets", Some(json!({ "name": "feat-1" })))
        .await?;

    let (status, body) = h
        .json(
            Method::PUT,
            "/api/v1/changesets/feat-1/review",
            Some(json!({ "review_state": "approved" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["review_state"], "approved");

    let (status, body) = h
        .json(Method::POST, "/api/v1/changesets/feat-1/close", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "closed");

    let (status, body) = h.json(Method::GET, "/api/v1/changesets?state=closed", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = h
        .json(Method::GET, "/api/v1/changesets/feat-1/components", None)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn plan_apply_merge_round_trip() -> Result<()> {
    let h = Harness::new().await?;

    let (_, module) = h
        .json(
            Method::POST,
            "/api/v1/modules",
            Some(json!({ "name": "bucket", "source": "./modules/bucket" })),
        )
        .await?;
    let (status, version) = h
        .json(
            Method::POST,
            &format!("/api/v1/modules/{}/versions", module["id"]),
            Some(json!({ "version": "1.0.0" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    h.send(Method::POST, "/api/v1/changesets", Some(json!({ "name": "feat-1" })))
        .await?;
    let (status, component) = h
        .json(
            Method::POST,
            "/api/v1/changesets/feat-1/components",
            Some(json!({
                "module_version_id": version["id"],
                "name": "web",
                "variables": { "x": 1 }
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let component_id = component["id"].as_i64().unwrap();

    let (status, plan) = h
        .json(
            Method::POST,
            &format!("/api/v1/changesets/feat-1/components/{component_id}/plans"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(plan["state"], "queued");
    let plan_id = plan["id"].as_i64().unwrap();

    let branch = BranchName::new("feat-1");
    h.state.pipeline().run_plan(PlanId::new(plan_id), &branch).await?;

    let (_, plan) = h
        .json(Method::GET, &format!("/api/v1/changesets/feat-1/plans/{plan_id}"), None)
        .await?;
    assert_eq!(plan["state"], "completed");
    assert_eq!(plan["summary"], json!({ "add": 1, "change": 0, "destroy": 0 }));

    let request = Request::get(format!("/api/v1/changesets/feat-1/plans/{plan_id}/logs"))
        .body(Body::empty())?;
    let response = h.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()?
        .starts_with("text/plain"));
    let log = response.into_body().collect().await?.to_bytes();
    assert!(String::from_utf8_lossy(&log).contains("1 to add"));

    let (status, apply) = h
        .json(
            Method::POST,
            &format!("/api/v1/changesets/feat-1/plans/{plan_id}/applies"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let apply_id = apply["id"].as_i64().unwrap();
    h.state.pipeline().run_apply(ApplyId::new(apply_id), &branch).await?;

    let (status, state) = h
        .json(
            Method::GET,
            &format!("/api/v1/changesets/feat-1/components/{component_id}/state"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["serial"], 1);
    assert_eq!(state["resources"].as_array().unwrap().len(), 1);

    let (status, merge) = h
        .json(Method::POST, "/api/v1/changesets/feat-1/merge", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merge["state"], "completed");

    let (_, trunk) = h.json(Method::GET, "/api/v1/components", None).await?;
    assert_eq!(trunk.as_array().unwrap().len(), 1);
    let (status, _) = h
        .json(Method::GET, &format!("/api/v1/components/{component_id}/state"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, merges) = h
        .json(Method::GET, "/api/v1/changesets/feat-1/merges", None)
        .await?;
    assert_eq!(merges.as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn current_rebase_reports_up_to_date() -> Result<()> {
    let h = Harness::new().await?;
    h.send(Method::POST, "/api/v1/changesets", Some(json!({ "name": "feat-1" })))
        .await?;

    let (status, report) = h
        .json(Method::POST, "/api/v1/changesets/feat-1/rebases", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["state"], "completed");
    assert_eq!(report["up_to_date"], true);
    assert!(report["id"].is_null());

    let (_, rebases) = h
        .json(Method::GET, "/api/v1/changesets/feat-1/rebases", None)
        .await?;
    assert!(rebases.as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn views_evaluate_against_reconciled_resources() -> Result<()> {
    let h = Harness::new().await?;

    let (status, report) = h
        .json(
            Method::POST,
            "/api/v1/resources/reconcile",
            Some(json!({
                "upserts": [
                    { "id": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "kind": "s3_bucket", "name": "app-logs", "provider": "aws" },
                    { "id": "a3bb189e-8bf9-3888-9912-ace4e6543002", "kind": "vm", "name": "worker", "provider": "gcp" }
                ]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["inserted"], 2);

    let (status, _) = h
        .json(
            Method::POST,
            "/api/v1/views",
            Some(json!({ "name": "buckets", "query": { "kind": "s3_bucket" } })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (_, matched) = h
        .json(Method::GET, "/api/v1/views/buckets/resources", None)
        .await?;
    assert_eq!(matched.as_array().unwrap().len(), 1);
    assert_eq!(matched[0]["name"], "app-logs");

    let (status, _) = h.send(Method::DELETE, "/api/v1/views/buckets", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = h.send(Method::GET, "/api/v1/views/buckets", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
