use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::domain::{
    AppliedResource, BranchName, ChangesetId, ChangesetState, ComponentId, CoreError,
    ModuleVersionId, Plan, ResourceQuery, TaskState, UserError,
};
use crate::store::VersionedStore;

async fn setup_store() -> Result<VersionedStore> {
    Ok(VersionedStore::connect("sqlite::memory:", 1).await?)
}

fn resource(address: &str, size: u32) -> AppliedResource {
    AppliedResource {
        address: address.to_string(),
        resource_type: "aws_s3_bucket".to_string(),
        name: address.rsplit('.').next().unwrap_or(address).to_string(),
        attributes: json!({ "size": size }),
    }
}

#[tokio::test]
async fn test_task_state_transitions_are_enforced() -> Result<()> {
    let store = setup_store().await?;

    let result = store
        .transact(&BranchName::new("feat-1"), "plans", |uow| {
            Box::pin(async move {
                let plan = plan::create(uow, ComponentId::new(1), ChangesetId::new(1)).await?;
                assert_eq!(plan.state, TaskState::Queued);

                let skipped = task::update_state::<Plan>(uow, plan.id.get(), TaskState::Completed).await;
                assert!(matches!(
                    skipped,
                    Err(CoreError::User(UserError::ConflictingState(_)))
                ));

                let running = task::update_state::<Plan>(uow, plan.id.get(), TaskState::Running).await?;
                let done = plan::complete(
                    uow,
                    running.id,
                    &PlanResult {
                        from_version: None,
                        to_version: Some("1.0.0".into()),
                        summary: crate::domain::ChangeSummary {
                            add: 3,
                            change: 0,
                            destroy: 0,
                        },
                    },
                )
                .await?;
                Ok::<_, CoreError>(done)
            })
        })
        .await?;

    assert_eq!(result.state, TaskState::Completed);
    assert_eq!(result.summary.map(|s| s.add), Some(3));
    assert_eq!(result.to_version.as_deref(), Some("1.0.0"));
    Ok(())
}

#[tokio::test]
async fn test_versioned_rows_are_branch_scoped() -> Result<()> {
    let store = setup_store().await?;
    let plan = store
        .transact(&BranchName::new("feat-1"), "plan", |uow| {
            Box::pin(async move {
                plan::create(uow, ComponentId::new(1), ChangesetId::new(1)).await
            })
        })
        .await?;

    let on_trunk = store
        .checkout(&BranchName::trunk(), move |uow| {
            Box::pin(async move { task::find::<Plan>(uow, plan.id.get()).await })
        })
        .await?;
    assert!(on_trunk.is_none());
    Ok(())
}

#[tokio::test]
async fn test_state_upsert_is_idempotent() -> Result<()> {
    let store = setup_store().await?;
    let component = ComponentId::new(10);

    let (first, second, resources) = store
        .transact(&BranchName::trunk(), "apply", move |uow| {
            Box::pin(async move {
                let first = state::upsert(uow, component, Some("1.0.0")).await?;
                for address in ["a.one", "a.two"] {
                    state::upsert_resource(uow, first.id, &resource(address, 1)).await?;
                }

                let second = state::upsert(uow, component, Some("1.0.0")).await?;
                for address in ["a.one", "a.two"] {
                    state::upsert_resource(uow, second.id, &resource(address, 2)).await?;
                }
                let resources = state::list_resources(uow, second.id).await?;
                Ok::<_, CoreError>((first, second, resources))
            })
        })
        .await?;

    assert_eq!(first.id, second.id);
    assert_eq!(second.serial, 2);
    assert_eq!(resources.len(), 2);
    assert!(resources.iter().all(|r| r.attributes == json!({ "size": 2 })));
    Ok(())
}

#[tokio::test]
async fn test_prune_removes_vanished_addresses() -> Result<()> {
    let store = setup_store().await?;

    let (pruned, remaining) = store
        .transact(&BranchName::trunk(), "apply", |uow| {
            Box::pin(async move {
                let state = state::upsert(uow, ComponentId::new(1), None).await?;
                for address in ["a.one", "a.two", "a.three"] {
                    state::upsert_resource(uow, state.id, &resource(address, 1)).await?;
                }
                let pruned = state::prune_resources(uow, state.id, &["a.two"]).await?;
                let remaining = state::list_resources(uow, state.id).await?;
                Ok::<_, CoreError>((pruned, remaining))
            })
        })
        .await?;

    assert_eq!(pruned, 2);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].address, "a.two");
    Ok(())
}

#[tokio::test]
async fn test_changeset_names_are_unique() -> Result<()> {
    let store = setup_store().await?;

    let result = store
        .transact(&BranchName::trunk(), "changesets", |uow| {
            Box::pin(async move {
                let created = changeset::create(uow, "feat-1").await?;
                assert_eq!(created.state, ChangesetState::Open);
                changeset::create(uow, "feat-1").await
            })
        })
        .await;

    assert!(matches!(
        result,
        Err(CoreError::User(UserError::ConflictingState(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_changeset_state_machine() -> Result<()> {
    let store = setup_store().await?;

    let result = store
        .transact(&BranchName::trunk(), "changesets", |uow| {
            Box::pin(async move {
                let created = changeset::create(uow, "feat-1").await?;
                changeset::update_state(uow, created.id, ChangesetState::Merged).await
            })
        })
        .await;

    assert!(matches!(
        result,
        Err(CoreError::User(UserError::ConflictingState(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_component_create_and_update() -> Result<()> {
    let store = setup_store().await?;

    let (updated, duplicate) = store
        .transact(&BranchName::new("feat-1"), "components", |uow| {
            Box::pin(async move {
                let new = NewComponent {
                    module_version_id: ModuleVersionId::new(5),
                    name: "web".into(),
                    variables: json!({ "x": 1 }).as_object().cloned().unwrap_or_default(),
                };
                let created = component::create(uow, &new).await?;
                let duplicate = component::create(uow, &new).await.err();
                let updated = component::update(
                    uow,
                    created.id,
                    &ComponentChanges {
                        module_version_id: Some(ModuleVersionId::new(6)),
                        variables: None,
                    },
                )
                .await?;
                Ok::<_, CoreError>((updated, duplicate))
            })
        })
        .await?;

    assert_eq!(updated.module_version_id, ModuleVersionId::new(6));
    assert_eq!(updated.variables.get("x"), Some(&json!(1)));
    assert!(matches!(
        duplicate,
        Some(CoreError::User(UserError::ConflictingState(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_module_versions_are_append_only() -> Result<()> {
    let store = setup_store().await?;

    let (versions, duplicate) = store
        .transact(&BranchName::trunk(), "modules", |uow| {
            Box::pin(async move {
                let m = module::create(uow, "bucket", "registry/acme/bucket/aws").await?;
                module::create_version(uow, m.id, "1.0.0").await?;
                module::create_version(uow, m.id, "1.1.0").await?;
                let duplicate = module::create_version(uow, m.id, "1.0.0").await.err();
                let versions = module::list_versions(uow, m.id).await?;
                Ok::<_, CoreError>((versions, duplicate))
            })
        })
        .await?;

    assert_eq!(
        versions.iter().map(|v| v.version.as_str()).collect::<Vec<_>>(),
        vec!["1.0.0", "1.1.0"]
    );
    assert!(duplicate.is_some_and(|e| e.is_user_error()));
    Ok(())
}

#[tokio::test]
async fn test_reconcile_resources() -> Result<()> {
    let store = setup_store().await?;
    let keep = Uuid::new_v4();
    let gone = Uuid::new_v4();
    let discovered = |id: Uuid, name: &str| DiscoveredResource {
        id,
        kind: "s3_bucket".into(),
        name: name.into(),
        provider: "aws".into(),
        attributes: json!({}),
    };
    let first = ReconcileBatch {
        upserts: vec![discovered(keep, "logs"), discovered(gone, "tmp")],
        deletes: vec![],
    };
    let second = ReconcileBatch {
        upserts: vec![discovered(keep, "logs-renamed")],
        deletes: vec![gone],
    };

    let (a, b, remaining) = store
        .transact(&BranchName::trunk(), "reconcile", move |uow| {
            Box::pin(async move {
                let a = inventory::reconcile(uow, &first).await?;
                let b = inventory::reconcile(uow, &second).await?;
                let remaining = inventory::list_resources(uow).await?;
                Ok::<_, CoreError>((a, b, remaining))
            })
        })
        .await?;

    assert_eq!(
        a,
        ReconcileReport {
            inserted: 2,
            updated: 0,
            deleted: 0
        }
    );
    assert_eq!(
        b,
        ReconcileReport {
            inserted: 0,
            updated: 1,
            deleted: 1
        }
    );
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "logs-renamed");
    Ok(())
}

#[tokio::test]
async fn test_view_save_replaces_by_name() -> Result<()> {
    let store = setup_store().await?;

    let views = store
        .transact(&BranchName::trunk(), "views", |uow| {
            Box::pin(async move {
                let first = ResourceQuery {
                    kind: Some("s3_bucket".into()),
                    ..ResourceQuery::default()
                };
                let second = ResourceQuery {
                    provider: Some("aws".into()),
                    ..ResourceQuery::default()
                };
                inventory::save_view(uow, "buckets", &first).await?;
                let saved = inventory::save_view(uow, "buckets", &second).await?;
                assert_eq!(saved.query, second);
                inventory::list_views(uow).await
            })
        })
        .await?;

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].query.provider.as_deref(), Some("aws"));
    Ok(())
}
