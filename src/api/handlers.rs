use super::error::ApiError;
use super::AppState;
use crate::error::{ErrorCode, PilotError};
use crate::status::{Run, StepId, StepStatus};
use crate::workflow::RunDescriptor;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Body of `POST /runs`. Every field is optional here so that a missing
/// one is reported as a validation error rather than a decode failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub prompt: Option<String>,
    #[serde(alias = "repoUrl")]
    pub repo_locator: Option<String>,
    #[serde(alias = "userEmail")]
    pub recipient: Option<String>,
    #[serde(alias = "githubToken")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub action: Option<String>,
    pub step_id: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
}

/// A validated status update
#[derive(Debug, Clone, PartialEq, Eq)]
enum StatusUpdate {
    UpdateStep {
        step: StepId,
        status: StepStatus,
        error: Option<String>,
    },
    SetError {
        message: String,
        step: Option<StepId>,
    },
    Complete,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn malformed_body(rejection: JsonRejection) -> ApiError {
    ApiError(PilotError::validation(
        ErrorCode::VALIDATION_INVALID_FORMAT,
        format!("Request body is not valid JSON: {}", rejection.body_text()),
        None,
    ))
}

fn parse_field<T: std::str::FromStr<Err = String>>(
    value: &str,
    field: &str,
) -> Result<T, PilotError> {
    value.parse().map_err(|e: String| {
        PilotError::validation(ErrorCode::VALIDATION_INVALID_FORMAT, e, Some(field))
    })
}

impl StatusUpdateRequest {
    fn validate(self) -> Result<StatusUpdate, PilotError> {
        let action = non_empty(self.action).ok_or_else(|| PilotError::missing_field("action"))?;
        let step_id = non_empty(self.step_id);

        match action.as_str() {
            "updateStep" => {
                let step = step_id.ok_or_else(|| PilotError::missing_field("stepId"))?;
                let status =
                    non_empty(self.status).ok_or_else(|| PilotError::missing_field("status"))?;
                Ok(StatusUpdate::UpdateStep {
                    step: parse_field(&step, "stepId")?,
                    status: parse_field(&status, "status")?,
                    error: non_empty(self.error),
                })
            }
            "setError" => {
                let message =
                    non_empty(self.error).ok_or_else(|| PilotError::missing_field("error"))?;
                let step = step_id
                    .map(|s| parse_field(&s, "stepId"))
                    .transpose()?;
                Ok(StatusUpdate::SetError { message, step })
            }
            "complete" => Ok(StatusUpdate::Complete),
            other => Err(PilotError::validation(
                ErrorCode::VALIDATION_INVALID_ACTION,
                format!("Invalid action '{other}'"),
                Some("action"),
            )),
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn start_run(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let Json(request) = body.map_err(malformed_body)?;

    let prompt = non_empty(request.prompt).ok_or_else(|| PilotError::missing_field("prompt"))?;
    let repo_locator =
        non_empty(request.repo_locator).ok_or_else(|| PilotError::missing_field("repoLocator"))?;
    let secret =
        non_empty(request.credential).ok_or_else(|| PilotError::missing_field("credential"))?;

    let credential = state.credentials.store(secret);
    let descriptor = match RunDescriptor::new(
        &prompt,
        &repo_locator,
        credential.clone(),
        request.recipient.as_deref(),
    ) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            state.credentials.forget(&credential);
            return Err(e.into());
        }
    };

    let run_id = match state.engine.start(descriptor).await {
        Ok(run_id) => run_id,
        Err(e) => {
            state.credentials.forget(&credential);
            return Err(e.into());
        }
    };
    info!(run_id = %run_id, "Run started via API");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            message: format!("Run started. Poll GET /runs/{run_id} for progress."),
            run_id,
        }),
    ))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    state
        .engine
        .store()
        .get(&run_id)
        .await
        .map(|run| Json(Run::clone(&run)))
        .ok_or_else(|| ApiError::not_found(&run_id))
}

pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<Run>> {
    let runs = state.engine.store().list().await;
    Json(runs.iter().map(|run| run.as_ref().clone()).collect())
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    body: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<Run>, ApiError> {
    let Json(request) = body.map_err(malformed_body)?;
    let update = request.validate()?;
    let store = state.engine.store();

    let run = match update {
        StatusUpdate::UpdateStep {
            step,
            status,
            error,
        } => {
            store
                .update_step(&run_id, step, status, error.as_deref())
                .await
        }
        StatusUpdate::SetError { message, step } => {
            store.set_run_error(&run_id, &message, step).await
        }
        StatusUpdate::Complete => store.complete_run(&run_id).await,
    };

    run.map(|run| Json(Run::clone(&run)))
        .ok_or_else(|| ApiError::not_found(&run_id))
}
