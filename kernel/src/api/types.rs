//! Request and query DTOs.
//!
//! Responses serialize the domain entities directly.

use serde::{Deserialize, Serialize};

use crate::domain::{ChangesetState, ComponentId, ResourceQuery, ReviewState};

/// Body of `POST /changesets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChangesetRequest {
    /// Changeset and branch name.
    pub name: String,
}

/// Query of `GET /changesets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListChangesetsQuery {
    /// Only changesets in this state.
    pub state: Option<ChangesetState>,
}

/// Body of `PUT /changesets/{name}/review`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// New review decision.
    pub review_state: ReviewState,
}

/// Query of `GET /changesets/{name}/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of commits.
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// Query of `GET /changesets/{name}/plans`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPlansQuery {
    /// Only plans of this component.
    pub component_id: Option<ComponentId>,
}

/// Body of `POST /modules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModuleRequest {
    /// Unique module name.
    pub name: String,
    /// Source address handed to the executor.
    pub source: String,
}

/// Body of `POST /modules/{id}/versions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModuleVersionRequest {
    /// Version string, unique per module.
    pub version: String,
}

/// Body of `POST /views`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveViewRequest {
    /// View name; an existing view with this name is replaced.
    pub name: String,
    /// Filter to save.
    #[serde(default)]
    pub query: ResourceQuery,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_defaults() {
        let query: HistoryQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 50);
    }

    #[test]
    fn review_request_uses_snake_case_states() {
        let req: ReviewRequest =
            serde_json::from_str(r#"{"review_state": "changes_requested"}"#).unwrap();
        assert_eq!(req.review_state, ReviewState::ChangesRequested);
    }

    #[test]
    fn view_query_is_optional() {
        let req: SaveViewRequest = serde_json::from_str(r#"{"name": "buckets"}"#).unwrap();
        assert_eq!(req.query, ResourceQuery::default());
    }
}
