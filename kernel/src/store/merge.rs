//! Branch integration: three-way row merge, rebase and diff.

use serde::Serialize;
use sqlx::SqliteConnection;

use super::error::{RowConflict, StoreError};
use super::graph;
use super::snapshot::{self, Snapshot};
use super::unit_of_work::{PendingCommit, UnitOfWork};
use crate::domain::{BranchName, TRUNK};

/// Result of merging another branch into the unit-of-work branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Source was already contained in the target.
    UpToDate,
    /// Target had no own changes; its head moved to the source head.
    FastForward,
    /// A merge commit with two parents will be written.
    Merged {
        /// Rows taken from the source.
        rows_changed: usize,
    },
}

/// Result of rebasing the unit-of-work branch onto another branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RebaseOutcome {
    /// The branch already contains the upstream head.
    UpToDate,
    /// The branch had no own changes and now equals upstream.
    FastForward,
    /// Branch changes were replayed on top of upstream.
    Rebased {
        /// Rows taken from upstream.
        rows_changed: usize,
    },
}

/// How a row differs between the merge base and a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Row only exists on the branch.
    Added,
    /// Row content differs.
    Modified,
    /// Row was deleted on the branch.
    Removed,
}

/// One changed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowChange {
    /// Versioned table.
    pub table: &'static str,
    /// Row identifier.
    pub row_id: i64,
    /// Kind of change.
    pub kind: ChangeKind,
}

impl UnitOfWork {
    /// Merges `source` into this unit of work's branch.
    ///
    /// Must run before other writes in the same unit of work if a
    /// fast-forward is expected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MergeConflict`] if a row changed differently on
    /// both sides; the caller's transaction must then be discarded.
    pub async fn merge_branch(&mut self, source: &BranchName) -> Result<MergeOutcome, StoreError> {
        let target = self.branch().as_str().to_owned();
        let conn = self.writer()?;

        let target_head = graph::head(conn, &target).await?;
        let source_head = graph::head(conn, source.as_str()).await?;
        let base = graph::merge_base(conn, &target_head, &source_head)
            .await?
            .ok_or_else(|| StoreError::NoMergeBase(target.clone(), source.to_string()))?;

        if base == source_head {
            return Ok(MergeOutcome::UpToDate);
        }

        let ours = snapshot::working_set(conn, &target).await?;
        if base == target_head && is_clean(conn, &target_head, &ours).await? {
            snapshot::copy_branch_rows(conn, source.as_str(), &target).await?;
            graph::set_head(conn, &target, &source_head).await?;
            return Ok(MergeOutcome::FastForward);
        }

        let base_snapshot = snapshot::load_commit(conn, &base).await?;
        let theirs = snapshot::working_set(conn, source.as_str()).await?;
        let rows_changed =
            reconcile(conn, &base_snapshot, &ours, &theirs, source.as_str(), &target).await?;

        self.pending = PendingCommit::Merge {
            merge_parent: source_head,
        };
        Ok(MergeOutcome::Merged { rows_changed })
    }

    /// Replays this branch's changes on top of `onto`.
    ///
    /// The resulting head has `onto`'s head as its only parent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MergeConflict`] if a row changed differently on
    /// both sides, or [`StoreError::TrunkProtected`] when run on trunk.
    pub async fn rebase_onto(&mut self, onto: &BranchName) -> Result<RebaseOutcome, StoreError> {
        if self.branch().is_trunk() {
            return Err(StoreError::TrunkProtected("rebase"));
        }
        let branch = self.branch().as_str().to_owned();
        let conn = self.writer()?;

        let branch_head = graph::head(conn, &branch).await?;
        let onto_head = graph::head(conn, onto.as_str()).await?;
        let base = graph::merge_base(conn, &branch_head, &onto_head)
            .await?
            .ok_or_else(|| StoreError::NoMergeBase(branch.clone(), onto.to_string()))?;

        if base == onto_head {
            return Ok(RebaseOutcome::UpToDate);
        }

        let ours = snapshot::working_set(conn, &branch).await?;
        if base == branch_head && is_clean(conn, &branch_head, &ours).await? {
            snapshot::copy_branch_rows(conn, onto.as_str(), &branch).await?;
            graph::set_head(conn, &branch, &onto_head).await?;
            return Ok(RebaseOutcome::FastForward);
        }

        let base_snapshot = snapshot::load_commit(conn, &base).await?;
        let upstream = snapshot::working_set(conn, onto.as_str()).await?;
        let rows_changed =
            reconcile(conn, &base_snapshot, &ours, &upstream, onto.as_str(), &branch).await?;

        self.pending = PendingCommit::Rebase { onto: onto_head };
        Ok(RebaseOutcome::Rebased { rows_changed })
    }
}

async fn is_clean(
    conn: &mut SqliteConnection,
    head: &str,
    working: &Snapshot,
) -> Result<bool, StoreError> {
    let commit = graph::get_commit(conn, head).await?;
    Ok(commit.root_hash == working.root_hash())
}

/// Applies `theirs`-side changes onto `to`, whose current rows are `ours`.
///
/// A row is taken from `from` when only that side changed it relative to
/// `base`. Rows changed on both sides to different content are conflicts,
/// and nothing is written when any conflict exists.
async fn reconcile(
    conn: &mut SqliteConnection,
    base: &Snapshot,
    ours: &Snapshot,
    theirs: &Snapshot,
    from: &str,
    to: &str,
) -> Result<usize, StoreError> {
    let mut conflicts = Vec::new();
    let mut incoming = Vec::new();

    for key in Snapshot::union_keys(&[base, ours, theirs]) {
        let (b, o, t) = (base.get(&key), ours.get(&key), theirs.get(&key));
        if o == t || t == b {
            continue;
        }
        if o == b {
            incoming.push(key);
        } else {
            conflicts.push(RowConflict {
                table: key.0,
                row_id: key.1,
            });
        }
    }

    if !conflicts.is_empty() {
        return Err(StoreError::MergeConflict { conflicts });
    }

    for key in &incoming {
        snapshot::sync_row(conn, *key, from, to).await?;
    }
    Ok(incoming.len())
}

/// Row-level changes on `branch` since it diverged from trunk.
///
/// # Errors
///
/// Returns an error if either branch is missing or the graph is corrupt.
pub async fn diff(conn: &mut SqliteConnection, branch: &str) -> Result<Vec<RowChange>, StoreError> {
    let branch_head = graph::head(conn, branch).await?;
    let trunk_head = graph::head(conn, TRUNK).await?;
    let base = graph::merge_base(conn, &branch_head, &trunk_head)
        .await?
        .ok_or_else(|| StoreError::NoMergeBase(branch.to_string(), TRUNK.to_string()))?;

    let before = snapshot::load_commit(conn, &base).await?;
    let after = snapshot::working_set(conn, branch).await?;

    let changes = Snapshot::union_keys(&[&before, &after])
        .into_iter()
        .filter_map(|key| {
            let kind = match (before.get(&key), after.get(&key)) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(old), Some(new)) if old != new => ChangeKind::Modified,
                _ => return None,
            };
            Some(RowChange {
                table: key.0,
                row_id: key.1,
                kind,
            })
        })
        .collect();
    Ok(changes)
}
