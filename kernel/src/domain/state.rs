//! Lifecycle state machines for tasks and changesets.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Error returned when a persisted state string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} state: {value}")]
pub struct ParseStateError {
    /// Which state machine was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

/// State shared by plans, applies, merges and rebases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting to be picked up.
    Queued,
    /// Being executed.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error. Retrying requires a new row.
    Failed,
}

impl TaskState {
    /// States that count as "in flight" for admission checks.
    pub const IN_FLIGHT: [TaskState; 2] = [TaskState::Queued, TaskState::Running];

    /// Returns the lowercase name used for persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true when no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true for queued and running.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }

    /// Validates a single forward step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseStateError {
                kind: "task",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetState {
    /// Accepting edits, plans and applies.
    Open,
    /// A merge into trunk is in progress.
    Merging,
    /// Merged into trunk.
    Merged,
    /// A rebase onto trunk is in progress.
    Rebasing,
    /// Abandoned; its branch has been deleted.
    Closed,
}

impl ChangesetState {
    /// Returns the lowercase name used for persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::Rebasing => "rebasing",
            Self::Closed => "closed",
        }
    }

    /// Validates a changeset transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Merging | Self::Rebasing | Self::Closed)
                | (Self::Merging, Self::Merged | Self::Open)
                | (Self::Rebasing, Self::Open)
        )
    }

    /// Whether the changeset still owns a live branch.
    #[must_use]
    pub const fn has_branch(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for ChangesetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ChangesetState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "merging" => Ok(Self::Merging),
            "merged" => Ok(Self::Merged),
            "rebasing" => Ok(Self::Rebasing),
            "closed" => Ok(Self::Closed),
            other => Err(ParseStateError {
                kind: "changeset",
                value: other.to_string(),
            }),
        }
    }
}

/// Review status attached to a changeset. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// Nobody has looked at it yet.
    #[default]
    Unreviewed,
    /// Approved for merge.
    Approved,
    /// Reviewer asked for changes.
    ChangesRequested,
}

impl ReviewState {
    /// Returns the snake_case name used for persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unreviewed => "unreviewed",
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ReviewState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unreviewed" => Ok(Self::Unreviewed),
            "approved" => Ok(Self::Approved),
            "changes_requested" => Ok(Self::ChangesRequested),
            other => Err(ParseStateError {
                kind: "review",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_forward_transitions() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn task_state_rejects_skips_and_reversals() {
        assert!(!TaskState::Queued.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Queued));
        assert!(!TaskState::Running.can_transition_to(TaskState::Running));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Queued.is_in_flight());
        assert!(TaskState::Running.is_in_flight());
    }

    #[test]
    fn task_state_parses_its_own_names() {
        for state in [
            TaskState::Queued,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>(), Ok(state));
        }
        assert!("done".parse::<TaskState>().is_err());
    }

    #[test]
    fn changeset_transitions() {
        assert!(ChangesetState::Open.can_transition_to(ChangesetState::Merging));
        assert!(ChangesetState::Merging.can_transition_to(ChangesetState::Merged));
        assert!(ChangesetState::Merging.can_transition_to(ChangesetState::Open));
        assert!(ChangesetState::Rebasing.can_transition_to(ChangesetState::Open));
        assert!(!ChangesetState::Merged.can_transition_to(ChangesetState::Open));
        assert!(!ChangesetState::Closed.can_transition_to(ChangesetState::Open));
        assert!(!ChangesetState::Rebasing.can_transition_to(ChangesetState::Merged));
    }

    #[test]
    fn review_state_serializes_snake_case() {
        let json = serde_json::to_string(&ReviewState::ChangesRequested).unwrap();
        assert_eq!(json, "\"changes_requested\"");
        assert_eq!(
            "changes_requested".parse::<ReviewState>(),
            Ok(ReviewState::ChangesRequested)
        );
    }
}
