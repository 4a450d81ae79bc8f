//! Persisted entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{
    ApplyId, BranchName, ChangesetId, ComponentId, MergeId, ModuleId, ModuleVersionId, PlanId,
    RebaseId, StateId, StateResourceId, ViewResourceId,
};
use super::state::{ChangesetState, ReviewState, TaskState};

/// Input variables handed to a module.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// A named, isolated unit of proposed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Identifier.
    pub id: ChangesetId,
    /// Unique name; also the name of the branch it owns.
    pub name: String,
    /// Lifecycle state.
    pub state: ChangesetState,
    /// Review status.
    pub review_state: ReviewState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Changeset {
    /// The branch this changeset was created with.
    #[must_use]
    pub fn branch(&self) -> BranchName {
        BranchName::new(self.name.clone())
    }

    /// The branch on which this changeset's plans and applies are authoritative.
    ///
    /// Once merged, the rows live on trunk and the changeset branch is stale.
    #[must_use]
    pub fn owning_branch(&self) -> BranchName {
        match self.state {
            ChangesetState::Merged => BranchName::trunk(),
            _ => self.branch(),
        }
    }
}

/// An instance of a module version with concrete variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Identifier.
    pub id: ComponentId,
    /// Module version this component instantiates.
    pub module_version_id: ModuleVersionId,
    /// Name, unique per branch.
    pub name: String,
    /// Module inputs.
    pub variables: Variables,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Resource counts reported by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Resources to create.
    pub add: u32,
    /// Resources to update in place.
    pub change: u32,
    /// Resources to destroy.
    pub destroy: u32,
}

impl ChangeSummary {
    /// Returns true when the plan would not touch anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }
}

/// A computed infrastructure diff for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Identifier.
    pub id: PlanId,
    /// Component being planned.
    pub component_id: ComponentId,
    /// Changeset the plan belongs to.
    pub changeset_id: ChangesetId,
    /// Lifecycle state.
    pub state: TaskState,
    /// Version recorded on the component's state before this plan.
    pub from_version: Option<String>,
    /// Module version this plan moves to.
    pub to_version: Option<String>,
    /// Change counts, present once completed.
    pub summary: Option<ChangeSummary>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Execution of a completed plan against real infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apply {
    /// Identifier.
    pub id: ApplyId,
    /// Plan being applied.
    pub plan_id: PlanId,
    /// Changeset the apply belongs to.
    pub changeset_id: ChangesetId,
    /// Lifecycle state.
    pub state: TaskState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// An attempt to integrate a changeset branch into trunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    /// Identifier.
    pub id: MergeId,
    /// Changeset being merged.
    pub changeset_id: ChangesetId,
    /// Lifecycle state.
    pub state: TaskState,
    /// Failure reason, if any.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// An attempt to replay a changeset branch on top of trunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rebase {
    /// Identifier.
    pub id: RebaseId,
    /// Changeset being rebased.
    pub changeset_id: ChangesetId,
    /// Lifecycle state.
    pub state: TaskState,
    /// Failure reason, if any.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Last-applied state of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Identifier.
    pub id: StateId,
    /// Component this state belongs to. At most one state per component.
    pub component_id: ComponentId,
    /// Module version recorded by the last apply.
    pub version: Option<String>,
    /// Incremented on every apply.
    pub serial: i64,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// One managed resource inside a component's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    /// Identifier.
    pub id: StateResourceId,
    /// Owning state.
    pub state_id: StateId,
    /// Executor address, unique per state.
    pub address: String,
    /// Resource type, e.g. `aws_s3_bucket`.
    pub resource_type: String,
    /// Resource name within its module.
    pub name: String,
    /// Attribute values reported by the executor.
    pub attributes: serde_json::Value,
}

/// A resource reported by the executor after an apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedResource {
    /// Executor address, e.g. `module.web.aws_s3_bucket.logs`.
    pub address: String,
    /// Resource type.
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Attribute values.
    pub attributes: serde_json::Value,
}

/// A reusable infrastructure template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Identifier.
    pub id: ModuleId,
    /// Unique name.
    pub name: String,
    /// Source address passed to the executor.
    pub source: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A pinned version of a module. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleVersion {
    /// Identifier.
    pub id: ModuleVersionId,
    /// Module this version belongs to.
    pub module_id: ModuleId,
    /// Version string, unique per module.
    pub version: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An externally discovered cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity supplied by discovery.
    pub id: Uuid,
    /// Resource kind, e.g. `s3_bucket`.
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Provider that reported it.
    pub provider: String,
    /// Raw attributes.
    pub attributes: serde_json::Value,
    /// Last time discovery touched this resource.
    pub updated_at: DateTime<Utc>,
}

/// Filter evaluated over discovered resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuery {
    /// Exact kind match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Exact provider match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Case-insensitive substring of the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
}

impl ResourceQuery {
    /// Returns true when `resource` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        if self.kind.as_ref().is_some_and(|k| *k != resource.kind) {
            return false;
        }
        if self.provider.as_ref().is_some_and(|p| *p != resource.provider) {
            return false;
        }
        match &self.name_contains {
            Some(needle) => resource
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

/// A named, saved query over resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewResource {
    /// Identifier.
    pub id: ViewResourceId,
    /// Unique name. Saving under an existing name replaces it.
    pub name: String,
    /// The saved filter.
    pub query: ResourceQuery,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(name: &str) -> Resource {
        Resource {
            id: Uuid::new_v4(),
            kind: "s3_bucket".into(),
            name: name.into(),
            provider: "aws".into(),
            attributes: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(ResourceQuery::default().matches(&bucket("logs")));
    }

    #[test]
    fn query_filters_on_every_criterion() {
        let query = ResourceQuery {
            kind: Some("s3_bucket".into()),
            provider: Some("aws".into()),
            name_contains: Some("LOG".into()),
        };
        assert!(query.matches(&bucket("app-logs")));
        assert!(!query.matches(&bucket("assets")));

        let other_provider = ResourceQuery {
            provider: Some("gcp".into()),
            ..ResourceQuery::default()
        };
        assert!(!other_provider.matches(&bucket("app-logs")));
    }

    #[test]
    fn merged_changeset_is_owned_by_trunk() {
        let now = Utc::now();
        let mut changeset = Changeset {
            id: ChangesetId::new(1),
            name: "feat-1".into(),
            state: ChangesetState::Open,
            review_state: ReviewState::Unreviewed,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(changeset.owning_branch(), BranchName::new("feat-1"));
        changeset.state = ChangesetState::Merged;
        assert!(changeset.owning_branch().is_trunk());
    }
}
