//! Versioned store adapter over SQLite.
//!
//! Mutations go through [`VersionedStore::transact`], which serializes
//! writers, binds a branch to a transaction, and records a commit when the
//! branch working set changed. Reads go through
//! [`VersionedStore::checkout`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::error::StoreError;
use super::graph::{self, Commit};
use super::merge::{self, RowChange};
use super::schema;
use super::snapshot;
use super::unit_of_work::UnitOfWork;
use crate::domain::{BranchName, TRUNK};

/// Branch-capable transactional store.
///
/// Cheap to clone; clones share the pool and the write gate.
#[derive(Debug, Clone)]
pub struct VersionedStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl VersionedStore {
    /// Opens (creating if needed) the database at `url` and installs the schema.
    ///
    /// In-memory URLs get a single, never-recycled connection so every
    /// caller sees the same database.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the schema cannot be installed.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and installs the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema installation fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        };
        store.install().await?;
        Ok(store)
    }

    async fn install(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        schema::install(&mut tx).await?;
        if graph::initialize_trunk(&mut tx).await? {
            debug!("Initialized trunk branch");
        }
        tx.commit().await?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs `f` inside one transaction bound to `branch`.
    ///
    /// The branch is created from trunk if absent. When `f` succeeds and the
    /// working set changed, a commit with `message` is recorded before the
    /// transaction commits. When `f` fails the transaction rolls back and
    /// nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a store error from setup or commit.
    #[instrument(skip(self, f), fields(branch = %branch))]
    pub async fn transact<F, T, E>(&self, branch: &BranchName, message: &str, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        ensure_branch_in(&mut tx, branch.as_str()).await?;

        let mut uow = UnitOfWork::transactional(branch.clone(), tx);
        let value = f(&mut uow).await?;

        if let Some(commit) = uow.finish(message).await? {
            debug!(commit = %commit.hash, "Committed working set");
        }
        Ok(value)
    }

    /// Runs read-only `f` against `branch`, creating the branch if absent.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a store error if the branch cannot be
    /// ensured or a connection acquired.
    pub async fn checkout<F, T, E>(&self, branch: &BranchName, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        self.ensure_branch(branch).await?;
        let conn = self.pool.acquire().await.map_err(StoreError::from)?;
        let mut uow = UnitOfWork::read_only(branch.clone(), conn);
        f(&mut uow).await
    }

    /// Creates `branch` from trunk if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn ensure_branch(&self, branch: &BranchName) -> Result<bool, StoreError> {
        if self.branch_exists(branch).await? {
            return Ok(false);
        }
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        let created = ensure_branch_in(&mut tx, branch.as_str()).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Returns true if `branch` exists.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn branch_exists(&self, branch: &BranchName) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(graph::try_head(&mut conn, branch.as_str()).await?.is_some())
    }

    /// Deletes `branch` and its working set. Its commits stay reachable from
    /// any branch that merged them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TrunkProtected`] for trunk and
    /// [`StoreError::BranchNotFound`] for unknown branches.
    #[instrument(skip(self), fields(branch = %branch))]
    pub async fn delete_branch(&self, branch: &BranchName) -> Result<(), StoreError> {
        if branch.is_trunk() {
            return Err(StoreError::TrunkProtected("delete"));
        }
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        graph::delete_branch_ref(&mut tx, branch.as_str()).await?;
        snapshot::clear_branch_rows(&mut tx, branch.as_str()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Head commit hash of `branch`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BranchNotFound`] if the branch does not exist.
    pub async fn head(&self, branch: &BranchName) -> Result<String, StoreError> {
        let mut conn = self.pool.acquire().await?;
        graph::head(&mut conn, branch.as_str()).await
    }

    /// Nearest common ancestor of two branch heads.
    ///
    /// # Errors
    ///
    /// Returns an error if either branch is missing.
    pub async fn merge_base(
        &self,
        a: &BranchName,
        b: &BranchName,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let a_head = graph::head(&mut conn, a.as_str()).await?;
        let b_head = graph::head(&mut conn, b.as_str()).await?;
        graph::merge_base(&mut conn, &a_head, &b_head).await
    }

    /// Row-level changes on `branch` relative to where it diverged from trunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch is missing.
    pub async fn diff(&self, branch: &BranchName) -> Result<Vec<RowChange>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        merge::diff(&mut conn, branch.as_str()).await
    }

    /// First-parent commit history of `branch`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch is missing.
    pub async fn history(&self, branch: &BranchName, limit: usize) -> Result<Vec<Commit>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        graph::history(&mut conn, branch.as_str(), limit).await
    }

    /// Every branch name.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn branches(&self) -> Result<Vec<BranchName>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(graph::list_branches(&mut conn)
            .await?
            .into_iter()
            .map(BranchName::new)
            .collect())
    }
}

async fn ensure_branch_in(conn: &mut SqliteConnection, branch: &str) -> Result<bool, StoreError> {
    if graph::try_head(conn, branch).await?.is_some() {
        return Ok(false);
    }
    let trunk_head = graph::head(conn, TRUNK).await?;
    graph::create_branch_ref(conn, branch, &trunk_head).await?;
    snapshot::copy_branch_rows(conn, TRUNK, branch).await?;
    debug!(branch, "Created branch from trunk");
    Ok(true)
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
