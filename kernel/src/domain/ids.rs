//! Domain identifiers - newtype wrappers for type safety.
//!
//! Every persisted entity is keyed by a store-assigned integer. Wrapping the
//! raw value keeps plan ids from being passed where apply ids are expected.

use core::fmt;
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates the identifier from a raw store value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw store value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&format!("{}-{}", $prefix, self.0))
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a changeset.
    ChangesetId,
    "changeset"
);
numeric_id!(
    /// Identifier of a component (versioned).
    ComponentId,
    "component"
);
numeric_id!(
    /// Identifier of a plan (versioned).
    PlanId,
    "plan"
);
numeric_id!(
    /// Identifier of an apply (versioned).
    ApplyId,
    "apply"
);
numeric_id!(
    /// Identifier of a merge attempt.
    MergeId,
    "merge"
);
numeric_id!(
    /// Identifier of a rebase attempt.
    RebaseId,
    "rebase"
);
numeric_id!(
    /// Identifier of a recorded component state (versioned).
    StateId,
    "state"
);
numeric_id!(
    /// Identifier of a single resource inside a recorded state (versioned).
    StateResourceId,
    "state-resource"
);
numeric_id!(
    /// Identifier of a module.
    ModuleId,
    "module"
);
numeric_id!(
    /// Identifier of a module version.
    ModuleVersionId,
    "module-version"
);
numeric_id!(
    /// Identifier of a saved resource view.
    ViewResourceId,
    "view"
);

/// Name of a branch in the versioned store.
///
/// Changesets own a branch named after themselves; [`BranchName::trunk`] is
/// the shared integration branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

/// Name of the trunk branch.
pub const TRUNK: &str = "main";

impl BranchName {
    /// Wraps a branch name without validation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The trunk branch.
    #[must_use]
    pub fn trunk() -> Self {
        Self(TRUNK.to_string())
    }

    /// Returns true when this is the trunk branch.
    #[must_use]
    pub fn is_trunk(&self) -> bool {
        self.0 == TRUNK
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
