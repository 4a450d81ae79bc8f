//! Merge/rebase engine.
//!
//! Merges and rebases run inline in the request. Each attempt is a row that
//! moves `queued -> running` in one short transaction on trunk, then the
//! branch operation and the terminal transition happen together in a
//! second transaction. If that transaction fails nothing it wrote survives,
//! and a third transaction records the failure.

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::changeset::{lookup, require_open, require_settled};
use crate::domain::{
    BranchName, Changeset, ChangesetId, ChangesetState, CoreError, Merge, MergeId, Rebase,
    RebaseId, TaskState, UserError,
};
use crate::infrastructure::audit::{log_audit, AuditEvent};
use crate::repository::{self, apply, attempt, plan, task, Attempt};
use crate::store::{RebaseOutcome, VersionedStore};
use crate::worker::WakeSignal;

/// Result of a rebase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseReport {
    /// Recorded attempt; absent when the branch was already current.
    pub id: Option<RebaseId>,
    /// Changeset that was rebased.
    pub changeset_id: ChangesetId,
    /// Terminal state of the attempt.
    pub state: TaskState,
    /// True when nothing had to be done.
    pub up_to_date: bool,
    /// Failure reason.
    pub error: Option<String>,
}

impl From<Rebase> for RebaseReport {
    fn from(rebase: Rebase) -> Self {
        Self {
            id: Some(rebase.id),
            changeset_id: rebase.changeset_id,
            state: rebase.state,
            up_to_date: false,
            error: rebase.error,
        }
    }
}

/// Integrates changeset branches with trunk.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    store: VersionedStore,
    apply_wake: WakeSignal,
}

impl MergeEngine {
    /// Creates an engine. `apply_wake` is notified when a merge queues
    /// applies.
    #[must_use]
    pub fn new(store: VersionedStore, apply_wake: WakeSignal) -> Self {
        Self { store, apply_wake }
    }

    /// Early rejection of unsettled changesets. [`Self::begin`] repeats the
    /// check under the write gate.
    async fn settled(&self, name: &str) -> Result<Changeset, CoreError> {
        let changeset = lookup(&self.store, name).await?;
        require_open(&changeset)?;
        let current = changeset.clone();
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move { require_settled(uow, &current).await })
            })
            .await?;
        Ok(changeset)
    }

    /// Inserts an attempt and moves it and the changeset forward, provided
    /// the changeset is still open and settled.
    async fn begin<A: Attempt + 'static>(
        &self,
        changeset: &Changeset,
        next: ChangesetState,
    ) -> Result<A, CoreError> {
        let changeset_id = changeset.id;
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("start {} of {}", A::TABLE.entity, changeset.name),
                move |uow| {
                    Box::pin(async move {
                        let current = repository::changeset::get(uow, changeset_id).await?;
                        require_open(&current)?;
                        require_settled(uow, &current).await?;
                        if attempt::has_in_flight::<A>(uow, changeset_id).await? {
                            return Err(UserError::conflict(format!(
                                "{changeset_id} already has a {} in progress",
                                A::TABLE.entity
                            ))
                            .into());
                        }
                        let queued: A = attempt::create(uow, changeset_id).await?;
                        repository::changeset::update_state(uow, changeset_id, next).await?;
                        task::update_state::<A>(uow, queued.raw_id(), TaskState::Running).await
                    })
                },
            )
            .await
    }

    /// Records a failed attempt and reopens the changeset.
    async fn abandon<A: Attempt + 'static>(
        &self,
        changeset: &Changeset,
        id: i64,
        cause: &CoreError,
    ) -> Result<A, CoreError> {
        let changeset_id = changeset.id;
        let reason = cause.to_string();
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("fail {} of {}", A::TABLE.entity, changeset.name),
                move |uow| {
                    Box::pin(async move {
                        let failed = attempt::fail::<A>(uow, id, &reason).await?;
                        repository::changeset::update_state(uow, changeset_id, ChangesetState::Open)
                            .await?;
                        Ok::<_, CoreError>(failed)
                    })
                },
            )
            .await
    }

    /// Merges a settled changeset into trunk and queues applies for every
    /// component whose latest completed plan has not been applied.
    ///
    /// A merge that fails in the store (including row conflicts) is recorded
    /// as a failed attempt and returned; the changeset stays open.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` if the changeset is not open, has queued
    /// or running plans or applies, or already has a merge in progress.
    #[instrument(skip(self))]
    pub async fn merge(&self, name: &str) -> Result<Merge, CoreError> {
        let changeset = self.settled(name).await?;
        let running: Merge = self.begin(&changeset, ChangesetState::Merging).await?;

        let merge_id = running.id;
        let changeset_id = changeset.id;
        let source = changeset.branch();
        let result = self
            .store
            .transact(
                &BranchName::trunk(),
                &format!("merge changeset {name}"),
                move |uow| {
                    Box::pin(async move {
                        let outcome = uow.merge_branch(&source).await?;
                        let mut cascaded: usize = 0;
                        for planned in plan::latest_completed_per_component(uow, changeset_id).await? {
                            if !apply::has_live_apply(uow, planned.id).await? {
                                apply::create(uow, planned.id, changeset_id).await?;
                                cascaded += 1;
                            }
                        }
                        let merged =
                            task::update_state::<Merge>(uow, merge_id.get(), TaskState::Completed)
                                .await?;
                        repository::changeset::update_state(uow, changeset_id, ChangesetState::Merged)
                            .await?;
                        Ok::<_, CoreError>((merged, outcome, cascaded))
                    })
                },
            )
            .await;

        match result {
            Ok((merged, outcome, cascaded)) => {
                metrics::counter!("stackforge_merges_total", "outcome" => "completed").increment(1);
                info!(changeset = %name, merge = %merge_id, ?outcome, cascaded, "Changeset merged");
                log_audit(&AuditEvent::ChangesetMerged {
                    changeset: name.to_owned(),
                    merge_id: merge_id.get(),
                    cascaded_applies: cascaded,
                });
                if cascaded > 0 {
                    self.apply_wake.notify();
                }
                Ok(merged)
            }
            Err(err) => {
                metrics::counter!("stackforge_merges_total", "outcome" => "failed").increment(1);
                error!(changeset = %name, merge = %merge_id, error = %err, "Merge failed");
                self.abandon(&changeset, merge_id.get(), &err).await
            }
        }
    }

    /// Rebases a settled changeset onto the current trunk head.
    ///
    /// When trunk's head is already the merge base nothing is recorded and
    /// an up-to-date report is returned. A conflicting rebase leaves the
    /// branch untouched and is returned as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` if the changeset is not open, has queued
    /// or running plans or applies, or already has a rebase in progress.
    #[instrument(skip(self))]
    pub async fn rebase(&self, name: &str) -> Result<RebaseReport, CoreError> {
        let changeset = self.settled(name).await?;
        let branch = changeset.branch();
        let trunk = BranchName::trunk();

        let base = self.store.merge_base(&branch, &trunk).await?;
        let trunk_head = self.store.head(&trunk).await?;
        if base.as_deref() == Some(trunk_head.as_str()) {
            info!(changeset = %name, "Changeset already current with trunk");
            log_audit(&AuditEvent::ChangesetRebased {
                changeset: name.to_owned(),
                rebase_id: None,
            });
            return Ok(RebaseReport {
                id: None,
                changeset_id: changeset.id,
                state: TaskState::Completed,
                up_to_date: true,
                error: None,
            });
        }

        let running: Rebase = self.begin(&changeset, ChangesetState::Rebasing).await?;
        let rebase_id = running.id;
        let changeset_id = changeset.id;
        let result = self
            .store
            .transact(
                &branch,
                &format!("rebase changeset {name} onto {trunk}"),
                move |uow| {
                    Box::pin(async move {
                        let outcome = uow.rebase_onto(&trunk).await?;
                        let rebased =
                            task::update_state::<Rebase>(uow, rebase_id.get(), TaskState::Completed)
                                .await?;
                        repository::changeset::update_state(uow, changeset_id, ChangesetState::Open)
                            .await?;
                        Ok::<_, CoreError>((rebased, outcome))
                    })
                },
            )
            .await;

        match result {
            Ok((rebased, outcome)) => {
                info!(changeset = %name, rebase = %rebase_id, ?outcome, "Changeset rebased");
                log_audit(&AuditEvent::ChangesetRebased {
                    changeset: name.to_owned(),
                    rebase_id: Some(rebase_id.get()),
                });
                let mut report = RebaseReport::from(rebased);
                report.up_to_date = outcome == RebaseOutcome::UpToDate;
                Ok(report)
            }
            Err(err) => {
                error!(changeset = %name, rebase = %rebase_id, error = %err, "Rebase failed");
                let failed: Rebase = self.abandon(&changeset, rebase_id.get(), &err).await?;
                Ok(failed.into())
            }
        }
    }

    async fn attempts<A: Attempt + 'static>(&self, name: &str) -> Result<Vec<A>, CoreError> {
        let changeset = lookup(&self.store, name).await?;
        let changeset_id = changeset.id;
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move { task::list_for_changeset::<A>(uow, changeset_id).await })
            })
            .await
    }

    async fn attempt<A: Attempt + 'static>(&self, name: &str, id: i64) -> Result<A, CoreError> {
        let changeset = lookup(&self.store, name).await?;
        let changeset_id = changeset.id;
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move {
                    let found: A = task::get(uow, id).await?;
                    if found.changeset_id() == changeset_id {
                        Ok(found)
                    } else {
                        Err(UserError::not_found(A::TABLE.entity, id).into())
                    }
                })
            })
            .await
    }

    /// Merge attempts of a changeset, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset.
    pub async fn list_merges(&self, name: &str) -> Result<Vec<Merge>, CoreError> {
        self.attempts(name).await
    }

    /// Loads one merge attempt of a changeset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not belong to the changeset.
    pub async fn get_merge(&self, name: &str, id: MergeId) -> Result<Merge, CoreError> {
        self.attempt(name, id.get()).await
    }

    /// Rebase attempts of a changeset, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown changeset.
    pub async fn list_rebases(&self, name: &str) -> Result<Vec<Rebase>, CoreError> {
        self.attempts(name).await
    }

    /// Loads one rebase attempt of a changeset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not belong to the changeset.
    pub async fn get_rebase(&self, name: &str, id: RebaseId) -> Result<Rebase, CoreError> {
        self.attempt(name, id.get()).await
    }
}

#[cfg(test)]
mod tests;
