//! Integration tests for checkpointed resume
//!
//! These tests verify that:
//! 1. A run interrupted mid-step resumes without repeating completed steps
//! 2. Boot-time recovery resumes only unfinished runs
//! 3. A recorded backoff and attempt count survive a restart
//! 4. Retention purges terminal runs and their checkpoints
//! 5. A failing checkpoint save fails the run and releases its credential

use anyhow::Result;
use async_trait::async_trait;
use patchpilot::credentials::{CredentialRef, CredentialVault};
use patchpilot::error::{ErrorCode, PilotError};
use patchpilot::status::{RunStatus, StepId, StepStatus};
use patchpilot::testing::{self, sample_output, ScriptedRunner};
use patchpilot::workflow::checkpoint::PendingRetry;
use patchpilot::workflow::{
    CheckpointStatus, CheckpointStore, FailureKind, FileCheckpointStore, InMemoryCheckpointStore,
    RunCheckpoint, RunOutcome, StepFailure, WorkflowEngine,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn env_descriptor() -> patchpilot::workflow::RunDescriptor {
    testing::descriptor(CredentialRef::env("GITHUB_TOKEN"), None)
}

fn engine(runner: &Arc<ScriptedRunner>, dir: &TempDir) -> WorkflowEngine {
    testing::engine_with(
        runner.clone(),
        Arc::new(FileCheckpointStore::new(dir.path())),
        Arc::new(CredentialVault::new()),
    )
}

async fn wait_for_terminal(engine: &WorkflowEngine, run_id: &str) -> RunStatus {
    for _ in 0..200 {
        if let Some(run) = engine.store().get(run_id).await {
            if run.status.is_terminal() {
                return run.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} did not finish");
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_checkpoint() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = Arc::new(ScriptedRunner::new());
    runner.hang_once(StepId::ExecuteChanges);

    let first = engine(&runner, &dir);
    let run_id = first.submit(env_descriptor()).await?;
    let handle = first.spawn(run_id.clone());
    tokio::time::timeout(Duration::from_secs(5), runner.wait_until_hung()).await?;
    handle.abort();
    let _ = handle.await;

    // A fresh engine stands in for a restarted process
    let second = engine(&runner, &dir);
    let outcome = second.execute(&run_id).await?;
    assert_eq!(outcome, RunOutcome::Completed);

    assert_eq!(runner.calls(StepId::InitializeSandbox), 1);
    assert_eq!(runner.calls(StepId::AnalyzeRepository), 1);
    assert_eq!(runner.calls(StepId::ExecuteChanges), 2);
    assert_eq!(runner.calls(StepId::CreatePullRequest), 1);

    let run = second.store().get(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let checkpoint = second.checkpoints().load(&run_id).await?.unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.completed_steps.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_boot_recovery_resumes_only_unfinished_runs() -> Result<()> {
    let dir = TempDir::new()?;
    let store = FileCheckpointStore::new(dir.path());

    let mut unfinished = RunCheckpoint::new("run_unfinished", env_descriptor());
    unfinished.record_output(sample_output(StepId::InitializeSandbox), 1);
    store.save(&unfinished).await?;

    let mut finished = RunCheckpoint::new("run_finished", env_descriptor());
    for step in StepId::pipeline(false) {
        finished.record_output(sample_output(step), 1);
    }
    finished.mark_completed();
    store.save(&finished).await?;

    let runner = Arc::new(ScriptedRunner::new());
    let engine = engine(&runner, &dir);
    let resumed = engine.resume_incomplete().await?;
    assert_eq!(resumed, vec!["run_unfinished".to_string()]);

    assert_eq!(
        wait_for_terminal(&engine, "run_unfinished").await,
        RunStatus::Completed
    );
    assert_eq!(runner.calls(StepId::InitializeSandbox), 0);
    assert_eq!(runner.calls(StepId::AnalyzeRepository), 1);

    // Terminal runs are still pollable after a restart
    let finished_run = engine.store().get("run_finished").await.unwrap();
    assert_eq!(finished_run.status, RunStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_pending_retry_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let store = FileCheckpointStore::new(dir.path());

    let mut checkpoint = RunCheckpoint::new("run_backoff", env_descriptor());
    checkpoint.record_output(sample_output(StepId::InitializeSandbox), 1);
    checkpoint.schedule_retry(PendingRetry {
        step: StepId::AnalyzeRepository,
        attempt: 3,
        resume_after: chrono::Utc::now() + chrono::Duration::milliseconds(150),
        last_error: StepFailure::new(FailureKind::NetworkTimeout, "timed out"),
    });
    store.save(&checkpoint).await?;

    let runner = Arc::new(ScriptedRunner::new());
    runner.fail(
        StepId::AnalyzeRepository,
        StepFailure::new(FailureKind::NetworkTimeout, "timed out again"),
    );
    let engine = engine(&runner, &dir);

    let started = Instant::now();
    let outcome = engine.execute("run_backoff").await?;
    assert!(started.elapsed() >= Duration::from_millis(100));

    // Attempt 3 was the last one the policy allows
    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            step: StepId::AnalyzeRepository,
            attempts: 3,
            ..
        }
    ));
    assert_eq!(runner.calls(StepId::AnalyzeRepository), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_run_is_not_executed_again() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail(
        StepId::InitializeSandbox,
        StepFailure::auth("token rejected"),
    );
    let engine = engine(&runner, &dir);

    let run_id = engine.submit(env_descriptor()).await?;
    let first = engine.execute(&run_id).await?;
    let second = engine.execute(&run_id).await?;

    assert_eq!(first, second);
    assert_eq!(runner.calls(StepId::InitializeSandbox), 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_run_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(&Arc::new(ScriptedRunner::new()), &dir);
    let err = engine.execute("run_missing").await.unwrap_err();
    assert_eq!(
        err.code(),
        patchpilot::error::ErrorCode::WORKFLOW_RUN_NOT_FOUND
    );
    Ok(())
}

#[tokio::test]
async fn test_retention_purges_terminal_runs_only() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = Arc::new(ScriptedRunner::new());
    runner.hang_once(StepId::InitializeSandbox);
    let engine = engine(&runner, &dir);

    let running = engine.submit(env_descriptor()).await?;
    let handle = engine.spawn(running.clone());
    tokio::time::timeout(Duration::from_secs(5), runner.wait_until_hung()).await?;

    let done = engine.submit(env_descriptor()).await?;
    assert_eq!(engine.execute(&done).await?, RunOutcome::Completed);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let purged = engine.purge_expired(Duration::from_millis(10)).await?;
    assert_eq!(purged, 1);

    assert!(engine.store().get(&done).await.is_none());
    assert!(engine.checkpoints().load(&done).await?.is_none());
    assert!(engine.store().get(&running).await.is_some());
    assert!(engine.checkpoints().load(&running).await?.is_some());

    handle.abort();
    Ok(())
}

/// Accepts a fixed number of saves, then reports a full disk
struct FillingStore {
    inner: InMemoryCheckpointStore,
    saves_left: AtomicU32,
}

impl FillingStore {
    fn new(saves: u32) -> Self {
        Self {
            inner: InMemoryCheckpointStore::new(),
            saves_left: AtomicU32::new(saves),
        }
    }
}

#[async_trait]
impl CheckpointStore for FillingStore {
    async fn save(&self, checkpoint: &RunCheckpoint) -> patchpilot::error::Result<()> {
        let left = self.saves_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(PilotError::storage("No space left on device"));
        }
        self.saves_left.store(left - 1, Ordering::SeqCst);
        self.inner.save(checkpoint).await
    }

    async fn load(&self, run_id: &str) -> patchpilot::error::Result<Option<RunCheckpoint>> {
        self.inner.load(run_id).await
    }

    async fn list(&self) -> patchpilot::error::Result<Vec<String>> {
        self.inner.list().await
    }

    async fn delete(&self, run_id: &str) -> patchpilot::error::Result<()> {
        self.inner.delete(run_id).await
    }
}

#[tokio::test]
async fn test_checkpoint_save_failure_is_reported_and_forgets_credential() -> Result<()> {
    let vault = Arc::new(CredentialVault::new());
    let credential = vault.store("ghp_secret");
    let engine = testing::engine_with(
        Arc::new(ScriptedRunner::new()),
        Arc::new(FillingStore::new(1)),
        vault.clone(),
    );

    let run_id = engine
        .submit(testing::descriptor(credential.clone(), None))
        .await?;
    let err = engine.execute(&run_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WORKFLOW_CHECKPOINT_ERROR);
    assert!(vault.resolve(&credential).is_err());
    Ok(())
}

#[tokio::test]
async fn test_engine_error_in_background_run_fails_one_step() -> Result<()> {
    let vault = Arc::new(CredentialVault::new());
    let credential = vault.store("ghp_secret");
    let engine = testing::engine_with(
        Arc::new(ScriptedRunner::new()),
        Arc::new(FillingStore::new(1)),
        vault.clone(),
    );

    let run_id = engine
        .submit(testing::descriptor(credential.clone(), None))
        .await?;
    engine.spawn(run_id.clone()).await?;

    let run = engine.store().get(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let failed: Vec<_> = run
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, StepId::InitializeSandbox);
    assert!(run.error.as_ref().unwrap().message.contains("checkpoint"));
    assert!(vault.resolve(&credential).is_err());
    Ok(())
}

#[tokio::test]
async fn test_lost_final_save_still_completes_status() -> Result<()> {
    // Submit plus one save per step; the final completion save fails
    let engine = testing::engine_with(
        Arc::new(ScriptedRunner::new()),
        Arc::new(FillingStore::new(5)),
        Arc::new(CredentialVault::new()),
    );

    let run_id = engine.submit(env_descriptor()).await?;
    engine.spawn(run_id.clone()).await?;

    let run = engine.store().get(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error.is_none());
    Ok(())
}
