//! Errors raised by the versioned store adapter.

use core::fmt;

/// A row changed differently on both sides of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowConflict {
    /// Versioned table the row lives in.
    pub table: &'static str,
    /// Row identifier.
    pub row_id: i64,
}

impl fmt::Display for RowConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.row_id)
    }
}

/// Errors that can occur when using the versioned store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database-related error.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),
    /// Branch does not exist.
    #[error("Branch not found: {0}")]
    BranchNotFound(String),
    /// Commit referenced by the graph does not exist.
    #[error("Commit not found: {0}")]
    CommitNotFound(String),
    /// Two branches share no history.
    #[error("No common ancestor between {0} and {1}")]
    NoMergeBase(String, String),
    /// Trunk may not be deleted or rebased.
    #[error("Operation not allowed on trunk: {0}")]
    TrunkProtected(&'static str),
    /// A write was attempted outside a transaction.
    #[error("Write attempted on a read-only checkout of {0}")]
    ReadOnly(String),
    /// Conflicting row changes.
    #[error("Merge conflict in {}", format_conflicts(.conflicts))]
    MergeConflict {
        /// Rows changed on both sides.
        conflicts: Vec<RowConflict>,
    },
    /// Persisted graph or snapshot data is inconsistent.
    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

fn format_conflicts(conflicts: &[RowConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_lists_rows() {
        let err = StoreError::MergeConflict {
            conflicts: vec![
                RowConflict {
                    table: "components",
                    row_id: 3,
                },
                RowConflict {
                    table: "plans",
                    row_id: 9,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Merge conflict in components#3, plans#9"
        );
    }
}
