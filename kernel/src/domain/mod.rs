//! Domain model: identifiers, lifecycle states, entities and errors.

/// Entity structs persisted by the repositories.
pub mod entities;
/// Error taxonomy (user vs internal).
pub mod error;
/// Newtype identifiers.
pub mod ids;
/// Task and changeset state machines.
pub mod state;

pub use entities::{
    AppliedResource, Apply, ChangeSummary, Changeset, Component, Merge, Module, ModuleVersion, Plan, Rebase,
    Resource, ResourceQuery, State, StateResource, Variables, ViewResource,
};
pub use error::{CoreError, UserError};
pub use ids::{
    ApplyId, BranchName, ChangesetId, ComponentId, MergeId, ModuleId, ModuleVersionId, PlanId,
    RebaseId, StateId, StateResourceId, ViewResourceId, TRUNK,
};
pub use state::{ChangesetState, ParseStateError, ReviewState, TaskState};
