//! Versioned store adapter: branches, commits and merges over SQLite.

/// Store errors.
pub mod error;
/// Commit graph and merge-base search.
pub mod graph;
/// Store handle with transactional and read-only entry points.
pub mod r#impl;
/// Three-way merge, rebase and diff.
pub mod merge;
/// Table definitions.
pub mod schema;
/// Row hashing and working-set snapshots.
pub mod snapshot;
/// Branch-bound unit of work.
pub mod unit_of_work;

pub use error::{RowConflict, StoreError};
pub use graph::{timestamp, Commit};
pub use merge::{ChangeKind, MergeOutcome, RebaseOutcome, RowChange};
pub use r#impl::VersionedStore;
pub use unit_of_work::UnitOfWork;
