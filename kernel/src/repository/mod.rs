//! Entity repositories.
//!
//! Every function takes an explicit [`UnitOfWork`](crate::store::UnitOfWork):
//! versioned entities read and write rows of the unit-of-work branch, global
//! entities ignore the branch. Task-shaped entities share the capability
//! set in [`task`].

/// Apply repository.
pub mod apply;
/// Merge and rebase attempts.
pub mod attempt;
/// Changeset repository.
pub mod changeset;
/// Component repository.
pub mod component;
/// Discovered resources and saved views.
pub mod inventory;
/// Modules and module versions.
pub mod module;
/// Plan repository.
pub mod plan;
mod rows;
/// Component state and state resources.
pub mod state;
/// Shared task lifecycle capability set.
pub mod task;

pub use attempt::Attempt;
pub use component::{ComponentChanges, NewComponent};
pub use inventory::{DiscoveredResource, ReconcileBatch, ReconcileReport};
pub use plan::PlanResult;
pub use task::{TaskRecord, TaskTable};

#[cfg(test)]
mod tests;
