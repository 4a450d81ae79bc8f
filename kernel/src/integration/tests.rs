use anyhow::Result;
use serde_json::json;

use super::*;
use crate::catalog::Catalog;
use crate::changeset::ChangesetManager;
use crate::domain::{Apply, ChangeSummary, Component, ComponentId, Plan, Variables};
use crate::repository::{ComponentChanges, NewComponent, PlanResult};

struct Fixture {
    store: VersionedStore,
    changesets: ChangesetManager,
    catalog: Catalog,
    engine: MergeEngine,
}

async fn fixture() -> Result<Fixture> {
    let store = VersionedStore::connect("sqlite::memory:", 1).await?;
    Ok(Fixture {
        changesets: ChangesetManager::new(store.clone()),
        catalog: Catalog::new(store.clone()),
        engine: MergeEngine::new(store.clone(), WakeSignal::detached()),
        store,
    })
}

impl Fixture {
    async fn component(&self, changeset: &str, name: &str) -> Result<Component> {
        let version = match self.catalog.list_modules().await?.first() {
            Some(m) => self.catalog.list_module_versions(m.id).await?[0].id,
            None => {
                let m = self.catalog.create_module("null", "hashicorp/null").await?;
                self.catalog.create_module_version(m.id, "1.0.0").await?.id
            }
        };
        Ok(self
            .catalog
            .create_component(
                changeset,
                NewComponent {
                    module_version_id: version,
                    name: name.into(),
                    variables: Variables::new(),
                },
            )
            .await?)
    }

    async fn set_x(&self, changeset: &str, id: ComponentId, x: i64) -> Result<()> {
        self.catalog
            .update_component(
                changeset,
                id,
                ComponentChanges {
                    module_version_id: None,
                    variables: json!({ "x": x }).as_object().cloned(),
                },
            )
            .await?;
        Ok(())
    }

    async fn plan(&self, changeset: &str, component_id: ComponentId, complete: bool) -> Result<Plan> {
        let owner = self.changesets.get(changeset).await?;
        let changeset_id = owner.id;
        let created = self
            .store
            .transact(&owner.branch(), "plan", move |uow| {
                Box::pin(async move {
                    let queued = plan::create(uow, component_id, changeset_id).await?;
                    if !complete {
                        return Ok(queued);
                    }
                    task::update_state::<Plan>(uow, queued.id.get(), TaskState::Running).await?;
                    plan::complete(
                        uow,
                        queued.id,
                        &PlanResult {
                            from_version: None,
                            to_version: Some("1.0.0".into()),
                            summary: ChangeSummary {
                                add: 1,
                                change: 0,
                                destroy: 0,
                            },
                        },
                    )
                    .await
                })
            })
            .await?;
        Ok(created)
    }

    async fn queued_applies_on_trunk(&self) -> Result<Vec<Apply>> {
        let applies = self
            .store
            .checkout(&BranchName::trunk(), |uow| {
                Box::pin(async move { task::list::<Apply>(uow, Some(TaskState::Queued)).await })
            })
            .await?;
        Ok(applies)
    }
}

#[tokio::test]
async fn merge_moves_changes_to_trunk_and_cascades_applies() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("feat-1").await?;
    let web = f.component("feat-1", "web").await?;
    let planned = f.plan("feat-1", web.id, true).await?;

    let merged = f.engine.merge("feat-1").await?;
    assert_eq!(merged.state, TaskState::Completed);
    assert_eq!(merged.error, None);

    let changeset = f.changesets.get("feat-1").await?;
    assert_eq!(changeset.state, ChangesetState::Merged);
    assert_eq!(f.catalog.list_components(None).await?.len(), 1);

    let applies = f.queued_applies_on_trunk().await?;
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].plan_id, planned.id);
    assert_eq!(applies[0].changeset_id, changeset.id);

    let again = f.engine.merge("feat-1").await;
    assert!(matches!(
        again,
        Err(CoreError::User(UserError::ConflictingState(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn merge_cascades_only_components_whose_newest_plan_completed() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("feat-1").await?;
    let web = f.component("feat-1", "web").await?;
    let db = f.component("feat-1", "db").await?;

    f.plan("feat-1", web.id, true).await?;
    let retried = f.plan("feat-1", web.id, false).await?.id.get();
    let branch = f.changesets.get("feat-1").await?.branch();
    f.store
        .transact(&branch, "fail retried plan", move |uow| {
            Box::pin(async move {
                task::update_state::<Plan>(uow, retried, TaskState::Running).await?;
                task::update_state::<Plan>(uow, retried, TaskState::Failed).await
            })
        })
        .await?;
    let current = f.plan("feat-1", db.id, true).await?;

    f.engine.merge("feat-1").await?;

    let applies = f.queued_applies_on_trunk().await?;
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].plan_id, current.id);
    Ok(())
}

#[tokio::test]
async fn merge_is_rejected_while_work_is_queued() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("feat-1").await?;
    let web = f.component("feat-1", "web").await?;
    f.plan("feat-1", web.id, false).await?;

    let result = f.engine.merge("feat-1").await;
    assert!(matches!(
        result,
        Err(CoreError::User(UserError::ConflictingState(_)))
    ));
    assert!(f.engine.list_merges("feat-1").await?.is_empty());
    assert_eq!(
        f.changesets.get("feat-1").await?.state,
        ChangesetState::Open
    );
    Ok(())
}

#[tokio::test]
async fn conflicting_merge_is_recorded_as_failed() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("base").await?;
    let web = f.component("base", "web").await?;
    f.engine.merge("base").await?;

    f.changesets.create("left").await?;
    f.changesets.create("right").await?;
    f.set_x("left", web.id, 1).await?;
    f.set_x("right", web.id, 2).await?;

    assert_eq!(f.engine.merge("left").await?.state, TaskState::Completed);
    let failed = f.engine.merge("right").await?;
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Merge conflict")));

    assert_eq!(f.changesets.get("right").await?.state, ChangesetState::Open);
    let on_trunk = f.catalog.get_component(None, web.id).await?;
    assert_eq!(on_trunk.variables.get("x"), Some(&json!(1)));

    let retried = f.engine.merge("right").await?;
    assert_eq!(retried.state, TaskState::Failed);
    assert_ne!(retried.id, failed.id);
    assert_eq!(f.engine.list_merges("right").await?.len(), 2);
    assert_eq!(f.engine.get_merge("right", failed.id).await?, failed);
    assert!(f.engine.get_merge("left", failed.id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn rebase_of_current_branch_is_a_no_op() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("feat-1").await?;
    let branch = BranchName::new("feat-1");
    let head_before = f.store.head(&branch).await?;

    let report = f.engine.rebase("feat-1").await?;
    assert!(report.up_to_date);
    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.id, None);

    assert_eq!(f.store.head(&branch).await?, head_before);
    assert!(f.engine.list_rebases("feat-1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn rebase_picks_up_trunk_changes() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("first").await?;
    f.changesets.create("second").await?;
    f.component("first", "web").await?;
    f.component("second", "db").await?;
    f.engine.merge("first").await?;

    let report = f.engine.rebase("second").await?;
    assert_eq!(report.state, TaskState::Completed);
    assert!(!report.up_to_date);
    let id = report.id.expect("rebase recorded");
    assert_eq!(f.engine.get_rebase("second", id).await?.state, TaskState::Completed);

    let mut names: Vec<String> = f
        .catalog
        .list_components(Some("second"))
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["db", "web"]);
    assert_eq!(f.changesets.get("second").await?.state, ChangesetState::Open);

    assert!(f.engine.rebase("second").await?.up_to_date);
    Ok(())
}

#[tokio::test]
async fn conflicting_rebase_leaves_branch_untouched() -> Result<()> {
    let f = fixture().await?;
    f.changesets.create("base").await?;
    let web = f.component("base", "web").await?;
    f.engine.merge("base").await?;

    f.changesets.create("left").await?;
    f.changesets.create("right").await?;
    f.set_x("left", web.id, 1).await?;
    f.set_x("right", web.id, 2).await?;
    f.engine.merge("left").await?;

    let head_before = f.store.head(&BranchName::new("right")).await?;
    let report = f.engine.rebase("right").await?;
    assert_eq!(report.state, TaskState::Failed);
    assert!(report.error.is_some());
    assert_eq!(f.store.head(&BranchName::new("right")).await?, head_before);

    let kept = f.catalog.get_component(Some("right"), web.id).await?;
    assert_eq!(kept.variables.get("x"), Some(&json!(2)));
    assert_eq!(f.changesets.get("right").await?.state, ChangesetState::Open);
    Ok(())
}
