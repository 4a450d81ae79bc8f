//! Application wiring.
//!
//! [`AppState`] owns one instance of every manager and is shared by the HTTP
//! handlers. Workers are started separately through [`AppState::spawn_workers`]
//! so tests can drive the pipeline by hand.

use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::changeset::ChangesetManager;
use crate::domain::CoreError;
use crate::infrastructure::config::{Settings, WorkerSettings};
use crate::integration::MergeEngine;
use crate::pipeline::{BlobStore, Executor, FsBlobStore, Pipeline, TofuExecutor, WorkspaceManager};
use crate::store::VersionedStore;
use crate::worker::{ApplySource, PlanSource, WakeSignal, Worker};

pub(crate) struct AppStateInner {
    pub(crate) store: VersionedStore,
    pub(crate) changesets: ChangesetManager,
    pub(crate) catalog: Catalog,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) engine: MergeEngine,
}

/// Shared control-plane state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub(crate) inner: Arc<AppStateInner>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pipeline", &self.inner.pipeline)
            .finish_non_exhaustive()
    }
}

/// Receiving ends of the worker wake signals.
#[derive(Debug)]
pub struct WakeReceivers {
    plan: mpsc::Receiver<()>,
    apply: mpsc::Receiver<()>,
}

/// Running workers and the token that stops them.
#[derive(Debug)]
pub struct Workers {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Workers {
    /// Token that stops every worker when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the workers and waits for the items they are running.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

impl AppState {
    /// Wires the managers around an opened store.
    pub fn new(
        store: VersionedStore,
        blobs: Arc<dyn BlobStore>,
        executor: Arc<dyn Executor>,
        workspaces: WorkspaceManager,
        wake_capacity: usize,
    ) -> (Self, WakeReceivers) {
        let (plan_wake, plan_rx) = WakeSignal::channel(wake_capacity);
        let (apply_wake, apply_rx) = WakeSignal::channel(wake_capacity);

        let pipeline = Pipeline::new(store.clone(), blobs, executor, workspaces)
            .with_wake(plan_wake, apply_wake.clone());

        let state = Self {
            inner: Arc::new(AppStateInner {
                changesets: ChangesetManager::new(store.clone()),
                catalog: Catalog::new(store.clone()),
                engine: MergeEngine::new(store.clone(), apply_wake),
                pipeline: Arc::new(pipeline),
                store,
            }),
        };
        let wakes = WakeReceivers {
            plan: plan_rx,
            apply: apply_rx,
        };
        (state, wakes)
    }

    /// Opens the store, blob stores and executor described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the data
    /// directory cannot be created.
    pub async fn from_settings(settings: &Settings) -> Result<(Self, WakeReceivers), CoreError> {
        let store = VersionedStore::connect(
            settings.database.url.expose_secret(),
            settings.database.max_connections,
        )
        .await?;
        tokio::fs::create_dir_all(&settings.storage.data_dir).await?;
        tokio::fs::create_dir_all(&settings.storage.work_dir).await?;

        info!(
            data_dir = %settings.storage.data_dir.display(),
            work_dir = %settings.storage.work_dir.display(),
            executor = %settings.executor.binary,
            "Control plane state initialized"
        );

        Ok(Self::new(
            store,
            Arc::new(FsBlobStore::new(&settings.storage.data_dir)),
            Arc::new(TofuExecutor::new(&settings.executor.binary)),
            WorkspaceManager::new(&settings.storage.work_dir),
            settings.workers.wake_capacity,
        ))
    }

    /// Fails tasks a previous process left running, then starts the plan
    /// and apply workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupted tasks cannot be failed.
    pub async fn spawn_workers(
        &self,
        wakes: WakeReceivers,
        settings: &WorkerSettings,
    ) -> Result<Workers, CoreError> {
        let pipeline = &self.inner.pipeline;
        pipeline.fail_interrupted().await?;
        let cancel = CancellationToken::new();

        let plan = Worker::new(
            Arc::new(PlanSource(Arc::clone(pipeline))),
            settings.plan_poll_interval(),
            wakes.plan,
            cancel.child_token(),
        )
        .spawn();
        let apply = Worker::new(
            Arc::new(ApplySource(Arc::clone(pipeline))),
            settings.apply_poll_interval(),
            wakes.apply,
            cancel.child_token(),
        )
        .spawn();

        Ok(Workers {
            handles: vec![plan, apply],
            cancel,
        })
    }

    /// The versioned store.
    #[must_use]
    pub fn store(&self) -> &VersionedStore {
        &self.inner.store
    }

    /// Changeset lifecycle operations.
    #[must_use]
    pub fn changesets(&self) -> &ChangesetManager {
        &self.inner.changesets
    }

    /// Modules, components and inventory.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Plan and apply pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    /// Merge and rebase engine.
    #[must_use]
    pub fn engine(&self) -> &MergeEngine {
        &self.inner.engine
    }
}
