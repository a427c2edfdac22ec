//! HTTP API tests driven through the router without a socket

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use patchpilot::api::router;
use patchpilot::status::{RunStatus, StepId};
use patchpilot::testing::MockCollaborators;
use patchpilot::workflow::WorkflowEngine;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn app(mocks: &MockCollaborators) -> (Router, WorkflowEngine) {
    let engine = mocks.engine();
    let app = router(engine.clone(), mocks.credentials.clone());
    (app, engine)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body)?).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn test_missing_prompt_is_rejected_without_creating_a_run() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, engine) = app(&mocks);

    let (status, body) = send(
        &app,
        "POST",
        "/runs",
        Some(json!({
            "repoLocator": "https://github.com/acme/widgets",
            "credential": "ghp_secret"
        })),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "E7001");
    assert_eq!(body["errorType"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("prompt"));
    assert!(!body["suggestions"].as_array().unwrap().is_empty());
    assert!(engine.store().list().await.is_empty());

    let (status, _) = send(&app, "GET", "/runs/run_never_created", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_missing_credential_is_rejected() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, engine) = app(&mocks);

    let (status, body) = send(
        &app,
        "POST",
        "/runs",
        Some(json!({
            "prompt": "Fix the README",
            "repoLocator": "https://github.com/acme/widgets"
        })),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("credential"));
    assert!(engine.store().list().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unsupported_host_is_rejected() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, _engine) = app(&mocks);

    let (status, body) = send(
        &app,
        "POST",
        "/runs",
        Some(json!({
            "prompt": "Fix the README",
            "repoLocator": "https://gitlab.com/acme/widgets",
            "credential": "ghp_secret"
        })),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "E7010");
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_a_bad_request() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, _engine) = app(&mocks);

    let request = Request::builder()
        .method("POST")
        .uri("/runs")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_accepted_run_is_pollable_until_completed() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, _engine) = app(&mocks);

    let (status, body) = send(
        &app,
        "POST",
        "/runs",
        Some(json!({
            "prompt": "Fix the README",
            "repoLocator": "https://github.com/acme/widgets",
            "credential": "ghp_secret"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["runId"].as_str().unwrap().to_string();
    assert!(body["message"].as_str().unwrap().contains(&run_id));

    let mut last = Value::Null;
    for _ in 0..200 {
        let (status, run) = send(&app, "GET", &format!("/runs/{run_id}"), None).await?;
        assert_eq!(status, StatusCode::OK);
        if run["status"] != "running" {
            last = run;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(last["status"], "completed");
    assert_eq!(last["runId"], run_id.as_str());
    let steps = last["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0]["id"], "initializeSandbox");
    assert!(steps.iter().all(|s| s["status"] == "completed"));

    // The submitted token reached the host but never the run document
    let tokens = mocks.host.tokens();
    assert!(!tokens.is_empty());
    assert!(tokens.iter().all(|t| t == "ghp_secret"));
    assert!(!last.to_string().contains("ghp_secret"));
    Ok(())
}

#[tokio::test]
async fn test_status_route_applies_updates() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, engine) = app(&mocks);
    engine
        .store()
        .create_run("run_manual", &StepId::pipeline(false))
        .await;

    let (status, run) = send(
        &app,
        "POST",
        "/runs/run_manual/status",
        Some(json!({"action": "updateStep", "stepId": "initializeSandbox", "status": "running"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["steps"][0]["status"], "running");

    let (status, run) = send(
        &app,
        "POST",
        "/runs/run_manual/status",
        Some(json!({"action": "complete"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "completed");
    assert!(run["steps"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["status"] == "completed"));

    let stored = engine.store().get("run_manual").await.unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_status_route_errors() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, engine) = app(&mocks);
    engine
        .store()
        .create_run("run_manual", &StepId::pipeline(false))
        .await;

    let (status, _) = send(
        &app,
        "POST",
        "/runs/run_unknown/status",
        Some(json!({"action": "complete"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/runs/run_manual/status",
        Some(json!({"action": "updateStep", "stepId": "initializeSandbox"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("status"));

    let (status, body) = send(
        &app,
        "POST",
        "/runs/run_manual/status",
        Some(json!({"action": "cancel"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "E7011");

    let (status, run) = send(
        &app,
        "POST",
        "/runs/run_manual/status",
        Some(json!({"action": "setError", "error": "sandbox vanished", "stepId": "analyzeRepository"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "failed");
    assert_eq!(run["error"]["stepId"], "analyzeRepository");
    assert_eq!(run["steps"][1]["status"], "failed");
    Ok(())
}

#[tokio::test]
async fn test_failed_step_update_fails_the_run() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, engine) = app(&mocks);
    engine
        .store()
        .create_run("run_manual", &StepId::pipeline(false))
        .await;

    let (status, run) = send(
        &app,
        "POST",
        "/runs/run_manual/status",
        Some(json!({"action": "updateStep", "stepId": "initializeSandbox", "status": "failed", "error": "clone refused"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "failed");
    assert_eq!(run["error"]["stepId"], "initializeSandbox");
    assert_eq!(run["steps"][0]["error"], "clone refused");

    // Later reports cannot move past the failure or complete the run
    for body in [
        json!({"action": "updateStep", "stepId": "analyzeRepository", "status": "running"}),
        json!({"action": "complete"}),
    ] {
        let (status, run) = send(&app, "POST", "/runs/run_manual/status", Some(body)).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["status"], "failed");
        assert_eq!(run["steps"][1]["status"], "pending");
    }
    Ok(())
}

#[tokio::test]
async fn test_rejection_always_carries_suggestions_array() -> Result<()> {
    let mocks = MockCollaborators::new();
    let (app, engine) = app(&mocks);

    let (status, body) = send(
        &app,
        "POST",
        "/runs",
        Some(json!({
            "prompt": "Fix the README",
            "repoLocator": "https://github.com/acme/widgets",
            "credential": "ghp_secret",
            "recipient": "not-an-address"
        })),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("recipient"));
    assert!(body["suggestions"].is_array());
    assert!(engine.store().list().await.is_empty());
    Ok(())
}
