//! Shared test utilities for integration tests.
//!
//! Provides an in-memory control plane with real workers and a scripted
//! executor standing in for OpenTofu.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use stackforge_kernel::app::{AppState, WakeReceivers, Workers};
use stackforge_kernel::domain::{
    AppliedResource, Apply, ChangeSummary, CoreError, ModuleVersionId, Plan, PlanId, TaskState,
};
use stackforge_kernel::infrastructure::config::WorkerSettings;
use stackforge_kernel::pipeline::{
    ApplyOutput, Executor, ExecutorError, LogSink, MemoryBlobStore, PlanOutput, WorkspaceManager,
};
use stackforge_kernel::store::VersionedStore;
use tempfile::TempDir;

/// How long a test waits for a worker before giving up.
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Executor that creates a fixed set of `null_resource`s.
pub struct FakeExecutor {
    resources: usize,
    fail_plans: bool,
    plans: AtomicUsize,
    applies: AtomicUsize,
}

impl FakeExecutor {
    /// Plans and applies `resources` new resources.
    pub fn creating(resources: usize) -> Self {
        Self {
            resources,
            fail_plans: false,
            plans: AtomicUsize::new(0),
            applies: AtomicUsize::new(0),
        }
    }

    /// Fails every plan.
    pub fn failing() -> Self {
        Self {
            fail_plans: true,
            ..Self::creating(0)
        }
    }

    /// Number of plans executed.
    pub fn plans(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }

    /// Number of applies executed.
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn plan(&self, workdir: &Path, log: LogSink) -> Result<PlanOutput, ExecutorError> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        if !workdir.join("main.tf.json").is_file() {
            return Err(ExecutorError::Output("workspace was not prepared".into()));
        }
        if self.fail_plans {
            log.send("Error: Invalid provider configuration".into())
                .await
                .ok();
            return Err(ExecutorError::Failed {
                step: "plan".into(),
                status: 1,
            });
        }
        let add = u32::try_from(self.resources).unwrap_or(u32::MAX);
        log.send(format!("Plan: {add} to add, 0 to change, 0 to destroy."))
            .await
            .ok();
        Ok(PlanOutput {
            artifact: Bytes::from(format!("plan:{add}")),
            summary: ChangeSummary {
                add,
                change: 0,
                destroy: 0,
            },
        })
    }

    async fn apply(
        &self,
        _workdir: &Path,
        artifact: Bytes,
        log: LogSink,
    ) -> Result<ApplyOutput, ExecutorError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        if !artifact.starts_with(b"plan:") {
            return Err(ExecutorError::Output("unexpected plan artifact".into()));
        }
        log.send(format!(
            "Apply complete! Resources: {} added, 0 changed, 0 destroyed.",
            self.resources
        ))
        .await
        .ok();
        Ok(ApplyOutput {
            resources: (0..self.resources)
                .map(|i| AppliedResource {
                    address: format!("module.main.null_resource.r{i}"),
                    resource_type: "null_resource".into(),
                    name: format!("r{i}"),
                    attributes: json!({ "id": i }),
                })
                .collect(),
        })
    }
}

/// Integration test context providing shared resources.
pub struct TestContext {
    /// Shared control-plane state.
    pub state: AppState,
    /// The executor behind the pipeline.
    pub executor: Arc<FakeExecutor>,
    wakes: Option<WakeReceivers>,
    _temp_dir: TempDir,
}

impl TestContext {
    /// Creates a context over an in-memory store. Workers are not started.
    pub async fn new(executor: FakeExecutor) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let store = VersionedStore::connect("sqlite::memory:", 1).await?;
        let executor = Arc::new(executor);
        let (state, wakes) = AppState::new(
            store,
            Arc::new(MemoryBlobStore::new()),
            executor.clone(),
            WorkspaceManager::new(temp_dir.path()),
            16,
        );
        Ok(Self {
            state,
            executor,
            wakes: Some(wakes),
            _temp_dir: temp_dir,
        })
    }

    /// Starts plan and apply workers with a short poll interval.
    pub async fn start_workers(&mut self) -> Result<Workers> {
        let Some(wakes) = self.wakes.take() else {
            bail!("workers already started");
        };
        let settings = WorkerSettings {
            plan_poll_interval_ms: 50,
            apply_poll_interval_ms: 50,
            wake_capacity: 16,
        };
        Ok(self.state.spawn_workers(wakes, &settings).await?)
    }

    /// Registers module `name` with version `1.0.0`.
    pub async fn module_version(&self, name: &str) -> Result<ModuleVersionId> {
        let catalog = self.state.catalog();
        let module = catalog.create_module(name, &format!("./modules/{name}")).await?;
        let version = catalog.create_module_version(module.id, "1.0.0").await?;
        Ok(version.id)
    }

    /// Polls a plan until it is terminal.
    pub async fn wait_for_plan(&self, changeset: &str, id: PlanId) -> Result<Plan> {
        let pipeline = self.state.pipeline();
        poll(move || pipeline.get_plan(changeset, id), |p| p.state).await
    }

    /// Polls the applies of a changeset until one exists and all are terminal.
    pub async fn wait_for_applies(&self, changeset: &str) -> Result<Vec<Apply>> {
        let pipeline = self.state.pipeline();
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let applies = pipeline.list_applies(changeset).await?;
                if !applies.is_empty() && applies.iter().all(|a| a.state.is_terminal()) {
                    return Ok::<_, anyhow::Error>(applies);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await?
    }
}

async fn poll<T, F, Fut>(mut fetch: F, state: impl Fn(&T) -> TaskState) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let item = fetch().await?;
            if state(&item).is_terminal() {
                return Ok::<_, anyhow::Error>(item);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?
}
