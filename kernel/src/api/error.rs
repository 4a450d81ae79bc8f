//! Mapping of core errors onto HTTP responses.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::domain::{CoreError, UserError};

/// Error returned by every handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Failure raised by a manager, the pipeline or the merge engine.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Request body could not be decoded.
    #[error("invalid request body: {0}")]
    Body(#[from] JsonRejection),
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        Self::Core(err.into())
    }
}

impl ApiError {
    /// Status code for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(CoreError::User(UserError::NotFound { .. })) => StatusCode::NOT_FOUND,
            Self::Core(CoreError::User(UserError::InvalidInput(_))) | Self::Body(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Core(CoreError::User(UserError::ConflictingState(_))) => StatusCode::CONFLICT,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn user_errors_map_to_client_statuses() {
        let cases = [
            (UserError::not_found("plan", 3), StatusCode::NOT_FOUND),
            (UserError::invalid("name is required"), StatusCode::BAD_REQUEST),
            (UserError::conflict("changeset is merged"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_are_redacted() {
        let err = ApiError::from(CoreError::Store(StoreError::BranchNotFound("feat".into())));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
