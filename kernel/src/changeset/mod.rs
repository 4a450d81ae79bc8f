//! Changeset manager.
//!
//! A changeset is a named unit of pending work backed by a branch of the
//! versioned store with the same name. Changeset rows themselves are global,
//! so lookups read through trunk and never create branches.

use tracing::{info, instrument};

use crate::domain::{
    Apply, BranchName, Changeset, ChangesetId, ChangesetState, CoreError, Plan, ReviewState,
    UserError, TRUNK,
};
use crate::infrastructure::audit::{log_audit, AuditEvent};
use crate::repository::{changeset, task};
use crate::store::{Commit, RowChange, UnitOfWork, VersionedStore};

const MAX_NAME_LEN: usize = 64;

/// Checks a changeset name: 1-64 characters of `[A-Za-z0-9._-]`, not the
/// trunk name.
///
/// # Errors
///
/// Returns [`UserError::InvalidInput`] describing the first violation.
pub fn validate_name(name: &str) -> Result<(), UserError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(UserError::invalid(format!(
            "changeset name must be 1 to {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(UserError::invalid(format!(
            "changeset name contains invalid character {c:?}"
        )));
    }
    if name == TRUNK {
        return Err(UserError::invalid(format!("{TRUNK} is reserved for trunk")));
    }
    Ok(())
}

/// Loads a changeset by name.
pub(crate) async fn lookup(store: &VersionedStore, name: &str) -> Result<Changeset, CoreError> {
    let name = name.to_owned();
    store
        .checkout(&BranchName::trunk(), move |uow| {
            Box::pin(async move { changeset::get_by_name(uow, &name).await })
        })
        .await
}

/// Rejects anything but an open changeset.
pub(crate) fn require_open(changeset: &Changeset) -> Result<(), CoreError> {
    if changeset.state == ChangesetState::Open {
        Ok(())
    } else {
        Err(UserError::conflict(format!(
            "changeset {} is {}, expected open",
            changeset.name, changeset.state
        ))
        .into())
    }
}

/// Rejects closed changesets, whose branch no longer exists.
pub(crate) fn require_readable(changeset: &Changeset) -> Result<(), CoreError> {
    if changeset.state.has_branch() {
        Ok(())
    } else {
        Err(UserError::conflict(format!("changeset {} is closed", changeset.name)).into())
    }
}

/// Rejects a changeset that still has queued or running plans or applies
/// on its owning branch.
///
/// Run it inside the transaction that merges, rebases or closes the
/// changeset: the write gate then keeps new work from slipping in between
/// the check and the state change.
pub(crate) async fn require_settled(
    uow: &mut UnitOfWork,
    changeset: &Changeset,
) -> Result<(), CoreError> {
    let branch = changeset.owning_branch();
    let plans = task::count_in_flight_on::<Plan>(uow, &branch, changeset.id).await?;
    let applies = task::count_in_flight_on::<Apply>(uow, &branch, changeset.id).await?;
    let pending = plans + applies;
    if pending > 0 {
        return Err(UserError::conflict(format!(
            "changeset {} has {pending} queued or running tasks",
            changeset.name
        ))
        .into());
    }
    Ok(())
}

/// Creates, looks up and retires changesets.
#[derive(Debug, Clone)]
pub struct ChangesetManager {
    store: VersionedStore,
}

impl ChangesetManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(store: VersionedStore) -> Self {
        Self { store }
    }

    /// Creates a changeset and its branch in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a bad name and `ConflictingState` for a
    /// duplicate.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str) -> Result<Changeset, CoreError> {
        validate_name(name)?;
        let branch = BranchName::new(name);
        let owned = name.to_owned();
        let created = self
            .store
            .transact(&branch, &format!("create changeset {name}"), move |uow| {
                Box::pin(async move { changeset::create(uow, &owned).await })
            })
            .await?;

        info!(changeset = %created.name, id = %created.id, "Changeset created");
        log_audit(&AuditEvent::ChangesetCreated {
            changeset: created.name.clone(),
        });
        Ok(created)
    }

    /// Loads a changeset by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn get(&self, name: &str) -> Result<Changeset, CoreError> {
        lookup(&self.store, name).await
    }

    /// Loads a changeset by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn get_by_id(&self, id: ChangesetId) -> Result<Changeset, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move { changeset::get(uow, id).await })
            })
            .await
    }

    /// Lists changesets, optionally filtered by state.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list(&self, state: Option<ChangesetState>) -> Result<Vec<Changeset>, CoreError> {
        self.store
            .checkout(&BranchName::trunk(), move |uow| {
                Box::pin(async move { changeset::list(uow, state).await })
            })
            .await
    }

    /// Records a review decision.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` for closed changesets.
    #[instrument(skip(self))]
    pub async fn set_review_state(
        &self,
        name: &str,
        review_state: ReviewState,
    ) -> Result<Changeset, CoreError> {
        let name = name.to_owned();
        self.store
            .transact(
                &BranchName::trunk(),
                &format!("review changeset {name}"),
                move |uow| {
                    Box::pin(async move {
                        let current = changeset::get_by_name(uow, &name).await?;
                        require_readable(&current)?;
                        changeset::set_review_state(uow, current.id, review_state).await
                    })
                },
            )
            .await
    }

    /// Closes an open changeset and deletes its branch.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` unless the changeset is open and has no
    /// queued or running work.
    #[instrument(skip(self))]
    pub async fn close(&self, name: &str) -> Result<Changeset, CoreError> {
        let owned = name.to_owned();
        let closed = self
            .store
            .transact(
                &BranchName::trunk(),
                &format!("close changeset {name}"),
                move |uow| {
                    Box::pin(async move {
                        let current = changeset::get_by_name(uow, &owned).await?;
                        require_open(&current)?;
                        require_settled(uow, &current).await?;
                        let closed =
                            changeset::update_state(uow, current.id, ChangesetState::Closed).await?;
                        uow.delete_branch(&closed.branch()).await?;
                        Ok::<_, CoreError>(closed)
                    })
                },
            )
            .await?;

        info!(changeset = %closed.name, "Changeset closed");
        log_audit(&AuditEvent::ChangesetClosed {
            changeset: closed.name.clone(),
        });
        Ok(closed)
    }

    /// Row-level changes of the changeset relative to its merge base.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` for closed changesets.
    pub async fn diff(&self, name: &str) -> Result<Vec<RowChange>, CoreError> {
        let current = lookup(&self.store, name).await?;
        require_readable(&current)?;
        Ok(self.store.diff(&current.branch()).await?)
    }

    /// Commit log of the changeset branch, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingState` for closed changesets.
    pub async fn history(&self, name: &str, limit: usize) -> Result<Vec<Commit>, CoreError> {
        let current = lookup(&self.store, name).await?;
        require_readable(&current)?;
        Ok(self.store.history(&current.branch(), limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> anyhow::Result<ChangesetManager> {
        let store = VersionedStore::connect("sqlite::memory:", 1).await?;
        Ok(ChangesetManager::new(store))
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("feat-1").is_ok());
        assert!(validate_name("release_2.0").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("main").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn create_makes_branch_and_row() -> anyhow::Result<()> {
        let manager = manager().await?;
        let created = manager.create("feat-1").await?;

        assert_eq!(created.state, ChangesetState::Open);
        assert_eq!(created.review_state, ReviewState::Unreviewed);
        assert!(manager.store.branch_exists(&BranchName::new("feat-1")).await?);
        assert_eq!(manager.get("feat-1").await?.id, created.id);
        assert_eq!(manager.get_by_id(created.id).await?.name, "feat-1");

        let duplicate = manager.create("feat-1").await;
        assert!(matches!(
            duplicate,
            Err(CoreError::User(UserError::ConflictingState(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn review_state_and_listing() -> anyhow::Result<()> {
        let manager = manager().await?;
        manager.create("a").await?;
        manager.create("b").await?;

        let reviewed = manager.set_review_state("b", ReviewState::Approved).await?;
        assert_eq!(reviewed.review_state, ReviewState::Approved);

        assert_eq!(manager.list(None).await?.len(), 2);
        assert_eq!(manager.list(Some(ChangesetState::Merged)).await?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn close_deletes_branch_and_blocks_reads() -> anyhow::Result<()> {
        let manager = manager().await?;
        manager.create("feat-1").await?;

        let closed = manager.close("feat-1").await?;
        assert_eq!(closed.state, ChangesetState::Closed);
        assert!(!manager.store.branch_exists(&BranchName::new("feat-1")).await?);

        assert!(manager.diff("feat-1").await.is_err());
        assert!(manager.close("feat-1").await.is_err());
        assert!(!manager.store.branch_exists(&BranchName::new("feat-1")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_changeset_is_not_found() -> anyhow::Result<()> {
        let manager = manager().await?;
        let result = manager.get("missing").await;
        assert!(matches!(
            result,
            Err(CoreError::User(UserError::NotFound { .. }))
        ));
        Ok(())
    }
}
