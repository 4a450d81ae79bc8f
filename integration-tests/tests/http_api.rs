//! Drives a live control-plane server through [`ApiClient`].

mod common;

use std::time::Duration;

use anyhow::Result;
use common::{FakeExecutor, TestContext};
use reqwest::Url;
use serde_json::json;
use stackforge_kernel::client::{wait_for_completion, ApiClient, ClientError, WaitOptions};
use stackforge_kernel::domain::TaskState;
use stackforge_kernel::infrastructure::server;
use stackforge_kernel::repository::NewComponent;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn serve(ctx: &TestContext) -> Result<(ApiClient, CancellationToken)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = server::router(ctx.state.clone(), None);
    let stop = CancellationToken::new();
    let stopped = stop.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stopped.cancelled().await })
            .await
    });
    let client = ApiClient::new(Url::parse(&format!("http://{addr}/"))?);
    Ok((client, stop))
}

fn fast() -> WaitOptions {
    WaitOptions {
        poll_interval: Duration::from_millis(25),
        timeout: Some(common::WAIT_LIMIT),
    }
}

#[tokio::test]
async fn changeset_lifecycle_over_http() -> Result<()> {
    let mut ctx = TestContext::new(FakeExecutor::creating(3)).await?;
    let workers = ctx.start_workers().await?;
    let (client, stop) = serve(&ctx).await?;
    let cancel = CancellationToken::new();

    let module = client.create_module("network", "./modules/network").await?;
    let version = client.create_module_version(module.id, "1.0.0").await?;
    client.create_changeset("feat-1").await?;
    let component = client
        .create_component(
            "feat-1",
            &NewComponent {
                module_version_id: version.id,
                name: "vpc".into(),
                variables: json!({ "x": 1 }).as_object().cloned().unwrap_or_default(),
            },
        )
        .await?;

    let plan = client.create_plan("feat-1", component.id).await?;
    let plan = wait_for_completion(|| client.get_plan("feat-1", plan.id), fast(), &cancel).await?;
    assert_eq!(plan.state, TaskState::Completed);
    assert!(client.plan_log("feat-1", plan.id).await?.contains("3 to add"));

    let apply = client.create_apply("feat-1", plan.id).await?;
    let apply =
        wait_for_completion(|| client.get_apply("feat-1", apply.id), fast(), &cancel).await?;
    assert_eq!(apply.state, TaskState::Completed);

    let state = client.component_state(Some("feat-1"), component.id).await?;
    assert_eq!(state.resources.len(), 3);

    let duplicate = client.create_apply("feat-1", plan.id).await.unwrap_err();
    assert_eq!(duplicate.status(), Some(409));

    let merge = client.merge("feat-1").await?;
    assert_eq!(merge.state, TaskState::Completed);
    assert_eq!(client.list_components(None).await?.len(), 1);

    stop.cancel();
    workers.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn waiting_honours_cancellation_and_timeout() -> Result<()> {
    let ctx = TestContext::new(FakeExecutor::creating(1)).await?;
    let (client, stop) = serve(&ctx).await?;

    let module = client.create_module("network", "./modules/network").await?;
    let version = client.create_module_version(module.id, "1.0.0").await?;
    client.create_changeset("feat-1").await?;
    let component = client
        .create_component(
            "feat-1",
            &NewComponent {
                module_version_id: version.id,
                name: "vpc".into(),
                variables: serde_json::Map::new(),
            },
        )
        .await?;
    // No workers: the plan stays queued.
    let plan = client.create_plan("feat-1", component.id).await?;

    let options = WaitOptions {
        poll_interval: Duration::from_millis(10),
        timeout: Some(Duration::from_millis(100)),
    };
    let never = CancellationToken::new();
    let err = wait_for_completion(|| client.get_plan("feat-1", plan.id), options, &never)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TimedOut(_)));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = wait_for_completion(
        || client.get_plan("feat-1", plan.id),
        WaitOptions::default(),
        &cancel,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));

    let missing = client.get_plan("feat-1", plan.id.get().saturating_add(100).into()).await;
    assert_eq!(missing.unwrap_err().status(), Some(404));

    stop.cancel();
    Ok(())
}
