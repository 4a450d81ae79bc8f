//! Plan/apply pipeline.
//!
//! Requests only insert queued rows and nudge the workers. Workers claim a
//! row (`queued -> running`) in one short transaction, run the executor with
//! no transaction open, then record the outcome in a second short
//! transaction. Executor failures end in `failed` and are never returned to
//! the worker as errors.

/// Plan and log stores.
pub mod blob;
/// External executor.
pub mod executor;
/// Executor output parsing.
pub mod report;
/// Working directories.
pub mod workspace;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

pub use blob::{BlobError, BlobKind, BlobStore, FsBlobStore, MemoryBlobStore};
pub use executor::{ApplyOutput, Executor, ExecutorError, LogSink, PlanOutput, TofuExecutor};
pub use workspace::{ModuleConfig, WorkspaceManager};

use crate::changeset::{lookup, require_open, require_readable};
use crate::domain::{
    Apply, ApplyId, BranchName, Changeset, ChangesetId, ChangesetState, ComponentId, CoreError,
    Plan, PlanId, TaskState, UserError,
};
use crate::repository::{self, apply, component, module, plan, state, task, PlanResult, TaskRecord};
use crate::store::VersionedStore;
use crate::worker::WakeSignal;

const LOG_BUFFER: usize = 256;

/// A queued row and the branch it must run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask<I> {
    /// Row id.
    pub id: I,
    /// Owning branch of the row's changeset.
    pub branch: BranchName,
}

impl<I: fmt::Display> fmt::Display for QueuedTask<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.id, self.branch)
    }
}

enum Claim<R> {
    Claimed(R),
    Skipped(TaskState),
}

fn record_outcome(kind: &'static str, state: TaskState, started: Instant) {
    metrics::counter!("stackforge_tasks_total", "kind" => kind, "outcome" => state.as_str())
        .increment(1);
    metrics::histogram!("stackforge_task_duration_seconds", "kind" => kind)
        .record(started.elapsed().as_secs_f64());
}

/// Creates and runs plans and applies.
pub struct Pipeline {
    store: VersionedStore,
    blobs: Arc<dyn BlobStore>,
    executor: Arc<dyn Executor>,
    workspaces: WorkspaceManager,
    plan_wake: WakeSignal,
    apply_wake: WakeSignal,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("workspaces", &self.workspaces)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline whose wake signals are detached.
    pub fn new(
        store: VersionedStore,
        blobs: Arc<dyn BlobStore>,
        executor: Arc<dyn Executor>,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            store,
            blobs,
            executor,
            workspaces,
            plan_wake: WakeSignal::detached(),
            apply_wake: WakeSignal::detached(),
        }
    }

    /// Connects the wake signals of the plan and apply workers.
    #[must_use]
    pub fn with_wake(mut self, plan: WakeSignal, apply: WakeSignal) -> Self {
        self.plan_wake = plan;
        self.apply_wake = apply;
        self
    }

    /// Nudges the apply worker.
    pub fn wake_applies(&self) {
        self.apply_wake.notify();
    }

    // ------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------

    /// Queues a plan for a component of an open changeset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset or component and
    /// `ConflictingState` if the changeset is not open or the component
    /// already has a queued or running plan in it.
    #[instrument(skip(self))]
    pub async fn create_plan(
        &self,
        component_id: ComponentId,
        changeset_name: &str,
    ) -> Result<Plan, CoreError> {
        let changeset = lookup(&self.store, changeset_name).await?;
        require_open(&changeset)?;
        let changeset_id = changeset.id;

        let created = self
            .store
            .transact(
                &changeset.branch(),
                &format!("create plan for component {}", component_id.get()),
                move |uow| {
                    Box::pin(async move {
                        require_open(&repository::changeset::get(uow, changeset_id).await?)?;
                        component::get(uow, component_id).await?;
                        let existing = plan::list_for_component(uow, component_id, changeset_id).await?;
                        if let Some(busy) = existing.iter().find(|p| p.state.is_in_flight()) {
                            return Err(UserError::conflict(format!(
                                "{component_id} already has {} {}",
                                busy.state, busy.id
                            ))
                            .into());
                        }
                        plan::create(uow, component_id, changeset_id).await
                    })
                },
            )
            .await?;

        info!(plan = %created.id, component = %component_id, changeset = %changeset.name, "Plan queued");
        self.plan_wake.notify();
        Ok(created)
    }

    /// Executes a queued plan on `branch`. Called by the plan worker.
    ///
    /// Returns the state the plan ended in. A plan that is no longer queued
    /// is left alone and its current state returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the plan cannot be claimed or its failure
    /// cannot be recorded.
    #[instrument(skip(self), fields(branch = %branch))]
    pub async fn run_plan(&self, id: PlanId, branch: &BranchName) -> Result<TaskState, CoreError> {
        let plan: Plan = match self.claim(id.get(), branch).await? {
            Claim::Claimed(plan) => plan,
            Claim::Skipped(state) => {
                debug!(plan = %id, %state, "Plan is not queued, skipping");
                return Ok(state);
            }
        };
        let started = Instant::now();

        let outcome = match self.execute_plan(&plan, branch).await {
            Ok(result) => self.complete_plan(id, branch, result).await,
            Err(err) => Err(err),
        };

        let state = match outcome {
            Ok(done) => {
                info!(plan = %id, summary = ?done.summary, "Plan completed");
                TaskState::Completed
            }
            Err(err) => {
                error!(plan = %id, branch = %branch, error = %err, "Plan failed");
                self.fail::<Plan>(id.get(), branch, BlobKind::PlanLog, &err)
                    .await?;
                TaskState::Failed
            }
        };
        record_outcome("plan", state, started);
        Ok(state)
    }

    async fn execute_plan(&self, plan: &Plan, branch: &BranchName) -> Result<PlanResult, CoreError> {
        let (config, from_version) = self.module_config(plan.component_id, branch).await?;
        let dir = self
            .workspaces
            .prepare("plan", plan.id.get(), &config)
            .await?;
        if let Err(err) = self.restore_state(plan.component_id, &dir).await {
            self.workspaces.release(&dir).await;
            return Err(err);
        }

        let outcome = self
            .capture_log(BlobKind::PlanLog, plan.id.get(), |log| {
                self.executor.plan(&dir, log)
            })
            .await;
        self.workspaces.release(&dir).await;
        let output = outcome?;

        self.blobs
            .store(BlobKind::PlanArtifact, plan.id.get(), output.artifact)
            .await?;
        Ok(PlanResult {
            from_version,
            to_version: Some(config.version),
            summary: output.summary,
        })
    }

    async fn complete_plan(
        &self,
        id: PlanId,
        branch: &BranchName,
        result: PlanResult,
    ) -> Result<Plan, CoreError> {
        self.store
            .transact(branch, &format!("complete plan {}", id.get()), move |uow| {
                Box::pin(async move { plan::complete(uow, id, &result).await })
            })
            .await
    }

    /// Loads a plan of a changeset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the plan does not belong to the changeset.
    pub async fn get_plan(&self, changeset_name: &str, id: PlanId) -> Result<Plan, CoreError> {
        let changeset = self.readable(changeset_name).await?;
        let plan: Plan = self.load(&changeset, id.get()).await?;
        if plan.changeset_id == changeset.id {
            Ok(plan)
        } else {
            Err(UserError::not_found("plan", id).into())
        }
    }

    /// Plans of a changeset, oldest first, optionally for one component.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset.
    pub async fn list_plans(
        &self,
        changeset_name: &str,
        component_id: Option<ComponentId>,
    ) -> Result<Vec<Plan>, CoreError> {
        let changeset = self.readable(changeset_name).await?;
        let changeset_id = changeset.id;
        self.store
            .checkout(&changeset.owning_branch(), move |uow| {
                Box::pin(async move {
                    match component_id {
                        Some(component) => {
                            plan::list_for_component(uow, component, changeset_id).await
                        }
                        None => task::list_for_changeset(uow, changeset_id).await,
                    }
                })
            })
            .await
    }

    /// Executor output captured for a plan; empty until the plan starts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the plan does not belong to the changeset.
    pub async fn plan_log(&self, changeset_name: &str, id: PlanId) -> Result<Bytes, CoreError> {
        self.get_plan(changeset_name, id).await?;
        self.log(BlobKind::PlanLog, id.get()).await
    }

    /// Queued plans on their owning branches, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn queued_plans(&self) -> Result<Vec<QueuedTask<PlanId>>, CoreError> {
        let found = self.queued::<Plan>(|p| p.changeset_id).await?;
        Ok(found
            .into_iter()
            .map(|(id, branch)| QueuedTask {
                id: PlanId::new(id),
                branch,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Applies
    // ------------------------------------------------------------------

    /// Queues an apply of a completed plan.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` unless the changeset is open, the plan is
    /// completed and the plan has no queued, running or completed apply.
    #[instrument(skip(self))]
    pub async fn create_apply(&self, plan_id: PlanId, changeset_name: &str) -> Result<Apply, CoreError> {
        let changeset = lookup(&self.store, changeset_name).await?;
        require_open(&changeset)?;
        let changeset_id = changeset.id;

        let created = self
            .store
            .transact(
                &changeset.branch(),
                &format!("create apply for plan {}", plan_id.get()),
                move |uow| {
                    Box::pin(async move {
                        require_open(&repository::changeset::get(uow, changeset_id).await?)?;
                        let planned = plan::get(uow, plan_id).await?;
                        if planned.changeset_id != changeset_id {
                            return Err(UserError::not_found("plan", plan_id).into());
                        }
                        if planned.state != TaskState::Completed {
                            return Err(UserError::conflict(format!(
                                "{plan_id} is {}, expected completed",
                                planned.state
                            ))
                            .into());
                        }
                        if apply::has_live_apply(uow, plan_id).await? {
                            return Err(
                                UserError::conflict(format!("{plan_id} already has an apply")).into()
                            );
                        }
                        apply::create(uow, plan_id, changeset_id).await
                    })
                },
            )
            .await?;

        info!(apply = %created.id, plan = %plan_id, changeset = %changeset.name, "Apply queued");
        self.apply_wake.notify();
        Ok(created)
    }

    /// Executes a queued apply on `branch`. Called by the apply worker.
    ///
    /// # Errors
    ///
    /// Returns an error only if the apply cannot be claimed or its failure
    /// cannot be recorded.
    #[instrument(skip(self), fields(branch = %branch))]
    pub async fn run_apply(&self, id: ApplyId, branch: &BranchName) -> Result<TaskState, CoreError> {
        let claimed: Apply = match self.claim(id.get(), branch).await? {
            Claim::Claimed(apply) => apply,
            Claim::Skipped(state) => {
                debug!(apply = %id, %state, "Apply is not queued, skipping");
                return Ok(state);
            }
        };
        let started = Instant::now();

        let state = match self.execute_apply(&claimed, branch).await {
            Ok(resources) => {
                info!(apply = %id, resources, "Apply completed");
                TaskState::Completed
            }
            Err(err) => {
                error!(apply = %id, branch = %branch, error = %err, "Apply failed");
                self.fail::<Apply>(id.get(), branch, BlobKind::ApplyLog, &err)
                    .await?;
                TaskState::Failed
            }
        };
        record_outcome("apply", state, started);
        Ok(state)
    }

    async fn execute_apply(&self, claimed: &Apply, branch: &BranchName) -> Result<usize, CoreError> {
        let plan_id = claimed.plan_id;
        let planned = self
            .store
            .checkout(branch, move |uow| {
                Box::pin(async move { plan::get(uow, plan_id).await })
            })
            .await?;

        let (config, _) = self.module_config(planned.component_id, branch).await?;
        if planned.to_version.as_deref() != Some(config.version.as_str()) {
            return Err(UserError::conflict(format!(
                "{} changed module version since {plan_id}",
                planned.component_id
            ))
            .into());
        }

        let artifact = self.blobs.load(BlobKind::PlanArtifact, plan_id.get()).await?;
        let dir = self
            .workspaces
            .prepare("apply", claimed.id.get(), &config)
            .await?;
        if let Err(err) = self.restore_state(planned.component_id, &dir).await {
            self.workspaces.release(&dir).await;
            return Err(err);
        }
        let outcome = self
            .capture_log(BlobKind::ApplyLog, claimed.id.get(), |log| {
                self.executor.apply(&dir, artifact, log)
            })
            .await;
        // A failed apply may still have changed real resources.
        let saved = self.save_state(planned.component_id, &dir).await;
        self.workspaces.release(&dir).await;
        let output = outcome?;
        saved?;

        let apply_id = claimed.id;
        let component_id = planned.component_id;
        let version = planned.to_version;
        self.store
            .transact(branch, &format!("complete apply {}", apply_id.get()), move |uow| {
                Box::pin(async move {
                    let current = state::upsert(uow, component_id, version.as_deref()).await?;
                    for resource in &output.resources {
                        state::upsert_resource(uow, current.id, resource).await?;
                    }
                    let keep: Vec<&str> = output
                        .resources
                        .iter()
                        .map(|r| r.address.as_str())
                        .collect();
                    state::prune_resources(uow, current.id, &keep).await?;
                    task::update_state::<Apply>(uow, apply_id.get(), TaskState::Completed).await?;
                    Ok::<_, CoreError>(output.resources.len())
                })
            })
            .await
    }

    /// Loads an apply of a changeset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the apply does not belong to the changeset.
    pub async fn get_apply(&self, changeset_name: &str, id: ApplyId) -> Result<Apply, CoreError> {
        let changeset = self.readable(changeset_name).await?;
        let found: Apply = self.load(&changeset, id.get()).await?;
        if found.changeset_id == changeset.id {
            Ok(found)
        } else {
            Err(UserError::not_found("apply", id).into())
        }
    }

    /// Applies of a changeset, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset.
    pub async fn list_applies(&self, changeset_name: &str) -> Result<Vec<Apply>, CoreError> {
        let changeset = self.readable(changeset_name).await?;
        let changeset_id = changeset.id;
        self.store
            .checkout(&changeset.owning_branch(), move |uow| {
                Box::pin(async move { task::list_for_changeset(uow, changeset_id).await })
            })
            .await
    }

    /// Executor output captured for an apply; empty until the apply starts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the apply does not belong to the changeset.
    pub async fn apply_log(&self, changeset_name: &str, id: ApplyId) -> Result<Bytes, CoreError> {
        self.get_apply(changeset_name, id).await?;
        self.log(BlobKind::ApplyLog, id.get()).await
    }

    /// Queued applies on their owning branches, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn queued_applies(&self) -> Result<Vec<QueuedTask<ApplyId>>, CoreError> {
        let found = self.queued::<Apply>(|a| a.changeset_id).await?;
        Ok(found
            .into_iter()
            .map(|(id, branch)| QueuedTask {
                id: ApplyId::new(id),
                branch,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Fails a plan whose worker task died before recording an outcome.
    ///
    /// Returns true if the plan was running and is now failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be loaded or updated.
    pub async fn abandon_plan(
        &self,
        id: PlanId,
        branch: &BranchName,
        reason: &str,
    ) -> Result<bool, CoreError> {
        self.interrupt::<Plan>(id.get(), branch, BlobKind::PlanLog, reason)
            .await
    }

    /// Fails an apply whose worker task died before recording an outcome.
    ///
    /// Returns true if the apply was running and is now failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the apply cannot be loaded or updated.
    pub async fn abandon_apply(
        &self,
        id: ApplyId,
        branch: &BranchName,
        reason: &str,
    ) -> Result<bool, CoreError> {
        self.interrupt::<Apply>(id.get(), branch, BlobKind::ApplyLog, reason)
            .await
    }

    /// Fails every plan and apply left running by a previous process.
    /// Call before the workers start.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan or an update fails.
    pub async fn fail_interrupted(&self) -> Result<usize, CoreError> {
        const REASON: &str = "interrupted: the control plane stopped while this task was running";
        let mut failed = 0;
        for (id, branch) in self.in_state::<Plan>(TaskState::Running, |p| p.changeset_id).await? {
            if self.interrupt::<Plan>(id, &branch, BlobKind::PlanLog, REASON).await? {
                failed += 1;
            }
        }
        for (id, branch) in self.in_state::<Apply>(TaskState::Running, |a| a.changeset_id).await? {
            if self.interrupt::<Apply>(id, &branch, BlobKind::ApplyLog, REASON).await? {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, "Failed tasks interrupted by a previous shutdown");
        }
        Ok(failed)
    }

    // ------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------

    async fn readable(&self, changeset_name: &str) -> Result<Changeset, CoreError> {
        let changeset = lookup(&self.store, changeset_name).await?;
        require_readable(&changeset)?;
        Ok(changeset)
    }

    async fn load<R: TaskRecord + 'static>(
        &self,
        changeset: &Changeset,
        id: i64,
    ) -> Result<R, CoreError> {
        self.store
            .checkout(&changeset.owning_branch(), move |uow| {
                Box::pin(async move { task::get::<R>(uow, id).await })
            })
            .await
    }

    async fn log(&self, kind: BlobKind, id: i64) -> Result<Bytes, CoreError> {
        match self.blobs.load(kind, id).await {
            Ok(log) => Ok(log),
            Err(BlobError::NotFound { .. }) => Ok(Bytes::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Moves a queued row to running in its own commit.
    async fn claim<R: TaskRecord + 'static>(
        &self,
        id: i64,
        branch: &BranchName,
    ) -> Result<Claim<R>, CoreError> {
        self.store
            .transact(
                branch,
                &format!("start {} {id}", R::TABLE.entity),
                move |uow| {
                    Box::pin(async move {
                        let current: R = task::get(uow, id).await?;
                        if current.state() != TaskState::Queued {
                            return Ok(Claim::Skipped(current.state()));
                        }
                        let running = task::update_state::<R>(uow, id, TaskState::Running).await?;
                        Ok::<_, CoreError>(Claim::Claimed(running))
                    })
                },
            )
            .await
    }

    /// Records a failure in the log and moves the row to failed.
    async fn fail<R: TaskRecord + 'static>(
        &self,
        id: i64,
        branch: &BranchName,
        log_kind: BlobKind,
        err: &CoreError,
    ) -> Result<(), CoreError> {
        let line = format!("error: {err}\n");
        if let Err(log_err) = self.blobs.append(log_kind, id, line.as_bytes()).await {
            warn!(id, error = %log_err, "Failed to record error in log");
        }
        self.store
            .transact(
                branch,
                &format!("fail {} {id}", R::TABLE.entity),
                move |uow| {
                    Box::pin(async move {
                        task::update_state::<R>(uow, id, TaskState::Failed).await?;
                        Ok::<_, CoreError>(())
                    })
                },
            )
            .await
    }

    /// Moves a running row to failed and notes `reason` in its log. Rows in
    /// any other state are left alone.
    async fn interrupt<R: TaskRecord + 'static>(
        &self,
        id: i64,
        branch: &BranchName,
        log_kind: BlobKind,
        reason: &str,
    ) -> Result<bool, CoreError> {
        let moved = self
            .store
            .transact(
                branch,
                &format!("abandon {} {id}", R::TABLE.entity),
                move |uow| {
                    Box::pin(async move {
                        let current: R = task::get(uow, id).await?;
                        if current.state() != TaskState::Running {
                            return Ok(false);
                        }
                        task::update_state::<R>(uow, id, TaskState::Failed).await?;
                        Ok::<_, CoreError>(true)
                    })
                },
            )
            .await?;
        if moved {
            let line = format!("error: {reason}\n");
            if let Err(log_err) = self.blobs.append(log_kind, id, line.as_bytes()).await {
                warn!(id, error = %log_err, "Failed to record error in log");
            }
            metrics::counter!("stackforge_tasks_total", "kind" => R::TABLE.entity, "outcome" => TaskState::Failed.as_str())
                .increment(1);
            error!(entity = R::TABLE.entity, id, %branch, reason, "Task abandoned");
        }
        Ok(moved)
    }

    /// Seeds `dir` with the executor state saved by the component's last apply.
    async fn restore_state(&self, component_id: ComponentId, dir: &Path) -> Result<(), CoreError> {
        match self
            .blobs
            .load(BlobKind::ComponentState, component_id.get())
            .await
        {
            Ok(saved) => self.workspaces.restore_state(dir, &saved).await,
            Err(BlobError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_state(&self, component_id: ComponentId, dir: &Path) -> Result<(), CoreError> {
        let Some(current) = self.workspaces.read_state(dir).await? else {
            return Ok(());
        };
        self.blobs
            .store(BlobKind::ComponentState, component_id.get(), current)
            .await?;
        debug!(component = %component_id, "Saved executor state");
        Ok(())
    }

    /// Component configuration and the version its state was last applied at.
    async fn module_config(
        &self,
        component_id: ComponentId,
        branch: &BranchName,
    ) -> Result<(ModuleConfig, Option<String>), CoreError> {
        self.store
            .checkout(branch, move |uow| {
                Box::pin(async move {
                    let target = component::get(uow, component_id).await?;
                    let version = module::get_version(uow, target.module_version_id).await?;
                    let source = module::get(uow, version.module_id).await?;
                    let applied = state::find_for_component(uow, component_id)
                        .await?
                        .and_then(|s| s.version);
                    let config = ModuleConfig {
                        name: target.name,
                        source: source.source,
                        version: version.version,
                        variables: target.variables,
                    };
                    Ok::<_, CoreError>((config, applied))
                })
            })
            .await
    }

    /// Runs `f` with a sink whose lines are appended to the `(kind, id)` log
    /// as they arrive.
    async fn capture_log<T, F, Fut>(&self, kind: BlobKind, id: i64, f: F) -> Result<T, ExecutorError>
    where
        F: FnOnce(LogSink) -> Fut,
        Fut: Future<Output = Result<T, ExecutorError>>,
    {
        let (tx, mut rx) = mpsc::channel::<String>(LOG_BUFFER);
        let blobs = Arc::clone(&self.blobs);
        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let mut chunk = line.into_bytes();
                chunk.push(b'\n');
                if let Err(err) = blobs.append(kind, id, &chunk).await {
                    warn!(%kind, id, error = %err, "Dropped log line");
                }
            }
        });

        let result = f(tx).await;
        if let Err(err) = writer.await {
            warn!(%kind, id, error = %err, "Log writer stopped");
        }
        result
    }

    /// Ids of queued `R` rows on the owning branch of their changeset.
    /// Copies of a row on other branches are ignored.
    async fn queued<R: TaskRecord + 'static>(
        &self,
        changeset_of: fn(&R) -> ChangesetId,
    ) -> Result<Vec<(i64, BranchName)>, CoreError> {
        self.in_state(TaskState::Queued, changeset_of).await
    }

    /// Rows in `wanted` state on their owning branch, oldest first.
    async fn in_state<R: TaskRecord + 'static>(
        &self,
        wanted: TaskState,
        changeset_of: fn(&R) -> ChangesetId,
    ) -> Result<Vec<(i64, BranchName)>, CoreError> {
        let changesets = self
            .store
            .checkout(&BranchName::trunk(), |uow| {
                Box::pin(async move { repository::changeset::list(uow, None).await })
            })
            .await?;
        let owners: HashMap<ChangesetId, BranchName> = changesets
            .iter()
            .filter(|c| c.state != ChangesetState::Closed)
            .map(|c| (c.id, c.owning_branch()))
            .collect();
        let branches: BTreeSet<BranchName> = owners.values().cloned().collect();

        let mut found = Vec::new();
        for branch in branches {
            let rows: Vec<R> = self
                .store
                .checkout(&branch, |uow| {
                    Box::pin(async move { task::list::<R>(uow, Some(wanted)).await })
                })
                .await?;
            for row in rows {
                if owners.get(&changeset_of(&row)) == Some(&branch) {
                    found.push((row.raw_id(), branch.clone()));
                }
            }
        }
        found.sort_by_key(|(id, _)| *id);
        Ok(found)
    }
}
