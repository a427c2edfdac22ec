//! Error responses for the HTTP API

use crate::error::{suggestions_for, ErrorCode, PilotError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub error_type: String,
    pub error_code: String,
    pub suggestions: Vec<String>,
}

/// A [`PilotError`] on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub PilotError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PilotError::Validation { .. } => StatusCode::BAD_REQUEST,
            PilotError::Workflow { code, .. } if *code == ErrorCode::WORKFLOW_RUN_NOT_FOUND => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(run_id: &str) -> Self {
        Self(PilotError::workflow(
            ErrorCode::WORKFLOW_RUN_NOT_FOUND,
            "Run not found",
            run_id,
        ))
    }
}

impl From<PilotError> for ApiError {
    fn from(error: PilotError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        let code = self.0.code();
        let body = ErrorBody {
            error: self.0.user_message(),
            error_type: self.0.error_type().to_string(),
            error_code: format!("E{code:04}"),
            suggestions: suggestions_for(code, self.0.field()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(PilotError::missing_field("prompt")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::not_found("run_x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(PilotError::storage("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_keeps_empty_suggestions() {
        let body = ErrorBody {
            error: "recipient is not an email address".into(),
            error_type: "validation_error".into(),
            error_code: "E7005".into(),
            suggestions: Vec::new(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["suggestions"], serde_json::json!([]));
    }
}
