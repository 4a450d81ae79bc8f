//! Explicit unit-of-work handle threaded through every store call.
//!
//! A unit of work binds a branch to either an open transaction (created by
//! [`VersionedStore::transact`](super::VersionedStore::transact)) or a plain
//! pooled connection (created by
//! [`VersionedStore::checkout`](super::VersionedStore::checkout)). Only the
//! transactional form hands out a writer.

use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection, Transaction};

use super::error::StoreError;
use super::graph::{self, Commit, NewCommit};
use super::schema::VersionedTable;
use super::snapshot;
use crate::domain::BranchName;

enum Handle {
    Transaction(Transaction<'static, Sqlite>),
    Connection(PoolConnection<Sqlite>),
}

/// Extra parents the closing commit must record.
#[derive(Debug, Default)]
pub(crate) enum PendingCommit {
    #[default]
    None,
    Merge {
        merge_parent: String,
    },
    Rebase {
        onto: String,
    },
}

/// Branch-bound database handle.
pub struct UnitOfWork {
    branch: BranchName,
    handle: Handle,
    pub(crate) pending: PendingCommit,
}

impl UnitOfWork {
    pub(crate) fn transactional(branch: BranchName, tx: Transaction<'static, Sqlite>) -> Self {
        Self {
            branch,
            handle: Handle::Transaction(tx),
            pending: PendingCommit::None,
        }
    }

    pub(crate) fn read_only(branch: BranchName, conn: PoolConnection<Sqlite>) -> Self {
        Self {
            branch,
            handle: Handle::Connection(conn),
            pending: PendingCommit::None,
        }
    }

    /// Branch every versioned query in this unit of work is scoped to.
    #[must_use]
    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    /// Returns true inside a transaction.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self.handle, Handle::Transaction(_))
    }

    /// Connection for queries.
    pub fn reader(&mut self) -> &mut SqliteConnection {
        match &mut self.handle {
            Handle::Transaction(tx) => &mut **tx,
            Handle::Connection(conn) => &mut **conn,
        }
    }

    /// Connection for mutations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadOnly`] outside a transaction.
    pub fn writer(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        match &mut self.handle {
            Handle::Transaction(tx) => Ok(&mut **tx),
            Handle::Connection(_) => Err(StoreError::ReadOnly(self.branch.to_string())),
        }
    }

    /// Allocates a globally unique id for a versioned table.
    ///
    /// Ids come from a single unversioned sequence so rows created on
    /// different branches never collide when merged.
    ///
    /// # Errors
    ///
    /// Returns an error outside a transaction or on database failure.
    pub async fn next_id(&mut self, table: &VersionedTable) -> Result<i64, StoreError> {
        let conn = self.writer()?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO vs_sequences (table_name, next_id) VALUES (?, 2)
             ON CONFLICT (table_name) DO UPDATE SET next_id = next_id + 1
             RETURNING next_id - 1",
        )
        .bind(table.name)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    /// Deletes another branch and its working set as part of this
    /// transaction, so the deletion commits or rolls back with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TrunkProtected`] for trunk or this unit of
    /// work's own branch, [`StoreError::BranchNotFound`] for unknown
    /// branches, and [`StoreError::ReadOnly`] outside a transaction.
    pub async fn delete_branch(&mut self, branch: &BranchName) -> Result<(), StoreError> {
        if branch.is_trunk() || branch == &self.branch {
            return Err(StoreError::TrunkProtected("delete"));
        }
        let conn = self.writer()?;
        graph::delete_branch_ref(conn, branch.as_str()).await?;
        snapshot::clear_branch_rows(conn, branch.as_str()).await
    }

    /// Commits the working set if it changed, then commits the transaction.
    pub(crate) async fn finish(mut self, message: &str) -> Result<Option<Commit>, StoreError> {
        let branch = self.branch.as_str().to_owned();
        let pending = std::mem::take(&mut self.pending);
        let conn = self.writer()?;

        let head_hash = graph::head(conn, &branch).await?;
        let head = graph::get_commit(conn, &head_hash).await?;
        let working = snapshot::working_set(conn, &branch).await?;
        let root_hash = working.root_hash();

        let commit = match pending {
            PendingCommit::None if root_hash == head.root_hash => None,
            PendingCommit::None => Some(
                graph::write_commit(
                    conn,
                    NewCommit {
                        branch: &branch,
                        message,
                        parent: Some(head_hash),
                        merge_parent: None,
                    },
                    &working,
                )
                .await?,
            ),
            PendingCommit::Merge { merge_parent } => Some(
                graph::write_commit(
                    conn,
                    NewCommit {
                        branch: &branch,
                        message,
                        parent: Some(head_hash),
                        merge_parent: Some(merge_parent),
                    },
                    &working,
                )
                .await?,
            ),
            PendingCommit::Rebase { onto } => {
                let onto_commit = graph::get_commit(conn, &onto).await?;
                if onto_commit.root_hash == root_hash {
                    graph::set_head(conn, &branch, &onto).await?;
                    None
                } else {
                    Some(
                        graph::write_commit(
                            conn,
                            NewCommit {
                                branch: &branch,
                                message,
                                parent: Some(onto),
                                merge_parent: None,
                            },
                            &working,
                        )
                        .await?,
                    )
                }
            }
        };

        if let Handle::Transaction(tx) = self.handle {
            tx.commit().await?;
        }
        Ok(commit)
    }
}
