//! End-to-end changeset scenarios driven through the library API with
//! running workers.

mod common;

use anyhow::Result;
use common::{FakeExecutor, TestContext};
use serde_json::json;
use stackforge_kernel::domain::{
    BranchName, ChangeSummary, ChangesetState, ComponentId, CoreError, ModuleVersionId, TaskState,
    UserError,
};
use stackforge_kernel::repository::NewComponent;
use tokio::task::JoinSet;

fn variables() -> stackforge_kernel::domain::Variables {
    json!({ "x": 1 }).as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn plan_and_apply_record_component_state() -> Result<()> {
    let mut ctx = TestContext::new(FakeExecutor::creating(3)).await?;
    let workers = ctx.start_workers().await?;
    let version = ctx.module_version("network").await?;

    ctx.state.changesets().create("feat-1").await?;
    let component = ctx
        .state
        .catalog()
        .create_component(
            "feat-1",
            NewComponent {
                module_version_id: version,
                name: "vpc".into(),
                variables: variables(),
            },
        )
        .await?;

    let plan = ctx.state.pipeline().create_plan(component.id, "feat-1").await?;
    assert_eq!(plan.state, TaskState::Queued);
    let plan = ctx.wait_for_plan("feat-1", plan.id).await?;
    assert_eq!(plan.state, TaskState::Completed);
    assert_eq!(
        plan.summary,
        Some(ChangeSummary {
            add: 3,
            change: 0,
            destroy: 0
        })
    );
    assert_eq!(plan.to_version.as_deref(), Some("1.0.0"));

    ctx.state.pipeline().create_apply(plan.id, "feat-1").await?;
    let applies = ctx.wait_for_applies("feat-1").await?;
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].state, TaskState::Completed);

    let state = ctx
        .state
        .catalog()
        .component_state(Some("feat-1"), component.id)
        .await?;
    assert_eq!(state.resources.len(), 3);
    assert_eq!(state.state.version.as_deref(), Some("1.0.0"));

    let log = ctx.state.pipeline().apply_log("feat-1", applies[0].id).await?;
    assert!(String::from_utf8_lossy(&log).contains("3 added"));

    workers.shutdown().await;
    assert_eq!(ctx.executor.plans(), 1);
    assert_eq!(ctx.executor.applies(), 1);
    Ok(())
}

#[tokio::test]
async fn merge_with_queued_plan_is_rejected() -> Result<()> {
    let ctx = TestContext::new(FakeExecutor::creating(1)).await?;
    let version = ctx.module_version("network").await?;
    ctx.state.changesets().create("feat-1").await?;
    let component = ctx
        .state
        .catalog()
        .create_component(
            "feat-1",
            NewComponent {
                module_version_id: version,
                name: "vpc".into(),
                variables: variables(),
            },
        )
        .await?;
    ctx.state.pipeline().create_plan(component.id, "feat-1").await?;

    let err = ctx.state.engine().merge("feat-1").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::User(UserError::ConflictingState(_))
    ));
    assert!(ctx.state.engine().list_merges("feat-1").await?.is_empty());
    assert_eq!(
        ctx.state.changesets().get("feat-1").await?.state,
        ChangesetState::Open
    );
    Ok(())
}

#[tokio::test]
async fn rebase_of_current_branch_touches_nothing() -> Result<()> {
    let ctx = TestContext::new(FakeExecutor::creating(1)).await?;
    ctx.state.changesets().create("feat-1").await?;
    let branch = BranchName::new("feat-1");
    let head = ctx.state.store().head(&branch).await?;
    let history = ctx.state.store().history(&branch, 100).await?;

    let report = ctx.state.engine().rebase("feat-1").await?;
    assert_eq!(report.state, TaskState::Completed);
    assert!(report.up_to_date);
    assert!(report.id.is_none());

    assert_eq!(ctx.state.store().head(&branch).await?, head);
    assert_eq!(ctx.state.store().history(&branch, 100).await?, history);
    assert!(ctx.state.engine().list_rebases("feat-1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_plan_requests_admit_one() -> Result<()> {
    let ctx = TestContext::new(FakeExecutor::creating(1)).await?;
    let version = ctx.module_version("network").await?;
    ctx.state.changesets().create("feat-1").await?;
    let component = ctx
        .state
        .catalog()
        .create_component(
            "feat-1",
            NewComponent {
                module_version_id: version,
                name: "vpc".into(),
                variables: variables(),
            },
        )
        .await?;

    let mut requests = JoinSet::new();
    for _ in 0..8 {
        let state = ctx.state.clone();
        let id = component.id;
        requests.spawn(async move { state.pipeline().create_plan(id, "feat-1").await });
    }

    let mut admitted = 0;
    let mut rejected = 0;
    while let Some(result) = requests.join_next().await {
        match result? {
            Ok(_) => admitted += 1,
            Err(CoreError::User(UserError::ConflictingState(_))) => rejected += 1,
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!((admitted, rejected), (1, 7));
    Ok(())
}

#[tokio::test]
async fn merge_queues_applies_for_unapplied_plans() -> Result<()> {
    let mut ctx = TestContext::new(FakeExecutor::creating(2)).await?;
    let workers = ctx.start_workers().await?;
    let version = ctx.module_version("storage").await?;
    ctx.state.changesets().create("feat-2").await?;
    let component = ctx
        .state
        .catalog()
        .create_component(
            "feat-2",
            NewComponent {
                module_version_id: version,
                name: "bucket".into(),
                variables: variables(),
            },
        )
        .await?;
    let plan = ctx.state.pipeline().create_plan(component.id, "feat-2").await?;
    ctx.wait_for_plan("feat-2", plan.id).await?;

    let merge = ctx.state.engine().merge("feat-2").await?;
    assert_eq!(merge.state, TaskState::Completed);

    let applies = ctx.wait_for_applies("feat-2").await?;
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].plan_id, plan.id);
    assert_eq!(applies[0].state, TaskState::Completed);

    let trunk_state = ctx.state.catalog().component_state(None, component.id).await?;
    assert_eq!(trunk_state.resources.len(), 2);

    workers.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_plan_is_terminal_and_retry_is_a_new_row() -> Result<()> {
    let mut ctx = TestContext::new(FakeExecutor::failing()).await?;
    let workers = ctx.start_workers().await?;
    let version = ctx.module_version("network").await?;
    ctx.state.changesets().create("feat-3").await?;
    let component = ctx
        .state
        .catalog()
        .create_component(
            "feat-3",
            NewComponent {
                module_version_id: version,
                name: "vpc".into(),
                variables: variables(),
            },
        )
        .await?;

    let first = ctx.state.pipeline().create_plan(component.id, "feat-3").await?;
    let first = ctx.wait_for_plan("feat-3", first.id).await?;
    assert_eq!(first.state, TaskState::Failed);
    let log = ctx.state.pipeline().plan_log("feat-3", first.id).await?;
    assert!(String::from_utf8_lossy(&log).contains("Invalid provider configuration"));

    let second = ctx.state.pipeline().create_plan(component.id, "feat-3").await?;
    assert_ne!(second.id, first.id);
    ctx.wait_for_plan("feat-3", second.id).await?;

    let first_again = ctx.state.pipeline().get_plan("feat-3", first.id).await?;
    assert_eq!(first_again.state, TaskState::Failed);

    workers.shutdown().await;
    Ok(())
}

/// Opens `changeset` with one component and returns the component id.
async fn component_on(
    ctx: &TestContext,
    changeset: &str,
    version: ModuleVersionId,
) -> Result<ComponentId> {
    ctx.state.changesets().create(changeset).await?;
    let component = ctx
        .state
        .catalog()
        .create_component(
            changeset,
            NewComponent {
                module_version_id: version,
                name: "web".into(),
                variables: variables(),
            },
        )
        .await?;
    Ok(component.id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn merge_racing_plan_creation_admits_at_most_one() -> Result<()> {
    let ctx = TestContext::new(FakeExecutor::creating(1)).await?;
    let version = ctx.module_version("network").await?;

    for i in 0..40 {
        let name = format!("race-{i}");
        let component = component_on(&ctx, &name, version).await?;

        let (merged, planned) = tokio::join!(
            ctx.state.engine().merge(&name),
            ctx.state.pipeline().create_plan(component, &name)
        );
        match (merged, planned) {
            (Ok(_), Ok(plan)) => panic!("{name}: merge completed while {} was queued", plan.id),
            (Ok(merge), Err(err)) => {
                assert_eq!(merge.state, TaskState::Completed);
                assert!(matches!(err, CoreError::User(UserError::ConflictingState(_))));
            }
            (Err(err), Ok(_)) => {
                assert!(matches!(err, CoreError::User(UserError::ConflictingState(_))));
                assert_eq!(
                    ctx.state.changesets().get(&name).await?.state,
                    ChangesetState::Open
                );
            }
            (Err(a), Err(b)) => panic!("{name}: both rejected: {a} / {b}"),
        }
    }

    let queued = ctx.state.pipeline().queued_plans().await?;
    assert!(queued.iter().all(|task| !task.branch.is_trunk()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_racing_plan_creation_loses_no_plan() -> Result<()> {
    let ctx = TestContext::new(FakeExecutor::creating(1)).await?;
    let version = ctx.module_version("network").await?;

    for i in 0..40 {
        let name = format!("close-{i}");
        let component = component_on(&ctx, &name, version).await?;

        let (closed, planned) = tokio::join!(
            ctx.state.changesets().close(&name),
            ctx.state.pipeline().create_plan(component, &name)
        );
        match (closed, planned) {
            (Ok(_), Ok(plan)) => panic!("{name}: closed while {} was queued", plan.id),
            (Ok(_), Err(_)) => {
                assert!(!ctx.state.store().branch_exists(&BranchName::new(&name)).await?);
            }
            (Err(err), Ok(plan)) => {
                assert!(matches!(err, CoreError::User(UserError::ConflictingState(_))));
                let kept = ctx.state.pipeline().get_plan(&name, plan.id).await?;
                assert_eq!(kept.state, TaskState::Queued);
            }
            (Err(a), Err(b)) => panic!("{name}: both rejected: {a} / {b}"),
        }
    }
    Ok(())
}
