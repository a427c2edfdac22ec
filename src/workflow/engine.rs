//! Workflow engine: sequential execution with checkpoints, retries and resume

use super::checkpoint::{CheckpointStore, PendingRetry, RunCheckpoint};
use super::descriptor::RunDescriptor;
use super::retry::{AbortReason, RetryDecision, RetryPolicy};
use super::steps::{StepInput, StepRunner};
use super::StepFailure;
use crate::credentials::CredentialVault;
use crate::error::{ErrorCode, PilotError, Result};
use crate::status::{RunStatusStore, StatusProjector, StepId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed {
        step: StepId,
        failure: StepFailure,
        attempts: u32,
    },
}

/// Executes runs through the fixed step pipeline.
///
/// Cloning is cheap; every clone drives the same stores.
#[derive(Clone)]
pub struct WorkflowEngine {
    runner: Arc<dyn StepRunner>,
    projector: Arc<StatusProjector>,
    checkpoints: Arc<dyn CheckpointStore>,
    credentials: Arc<CredentialVault>,
    retry: RetryPolicy,
}

impl WorkflowEngine {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        projector: Arc<StatusProjector>,
        checkpoints: Arc<dyn CheckpointStore>,
        credentials: Arc<CredentialVault>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            projector,
            checkpoints,
            credentials,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<RunStatusStore> {
        self.projector.store()
    }

    pub fn projector(&self) -> &Arc<StatusProjector> {
        &self.projector
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Validate the descriptor, create the run and its first checkpoint
    pub async fn submit(&self, descriptor: RunDescriptor) -> Result<String> {
        descriptor.validate()?;

        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let checkpoint = RunCheckpoint::new(run_id.clone(), descriptor);
        self.persist(&checkpoint).await?;
        self.store()
            .create_run(&run_id, &checkpoint.descriptor.steps())
            .await;

        info!(run_id = %run_id, repo = %checkpoint.descriptor.repo, "Run accepted");
        Ok(run_id)
    }

    /// Submit a run and execute it in the background
    pub async fn start(&self, descriptor: RunDescriptor) -> Result<String> {
        let run_id = self.submit(descriptor).await?;
        self.spawn(run_id.clone());
        Ok(run_id)
    }

    /// Execute an accepted run on its own task
    pub fn spawn(&self, run_id: String) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.execute(&run_id).await {
                error!(run_id = %run_id, "Run aborted by engine error: {}", e);
                let frozen = engine
                    .store()
                    .set_run_error(&run_id, &e.user_message(), None)
                    .await;
                // Every step already finished; only the final save was lost
                if frozen.is_some_and(|run| !run.status.is_terminal()) {
                    warn!(run_id = %run_id, "All steps completed but the final checkpoint was not saved");
                    engine.projector.run_completed(&run_id).await;
                }
            }
        })
    }

    /// Drive a run to a terminal state, replaying whatever its checkpoint
    /// already recorded. Safe to call for a run that crashed mid-step.
    pub async fn execute(&self, run_id: &str) -> Result<RunOutcome> {
        let mut checkpoint = self.checkpoints.load(run_id).await?.ok_or_else(|| {
            PilotError::workflow(
                ErrorCode::WORKFLOW_RUN_NOT_FOUND,
                "No checkpoint found",
                run_id,
            )
        })?;
        self.store().insert_if_absent(checkpoint.to_run()).await;

        let result = self.drive(&mut checkpoint).await;
        if result.is_err() {
            self.credentials.forget(&checkpoint.descriptor.credential);
        }
        result
    }

    async fn drive(&self, checkpoint: &mut RunCheckpoint) -> Result<RunOutcome> {
        let run_id = checkpoint.run_id.clone();
        let run_id = run_id.as_str();

        if let Some(outcome) = terminal_outcome(checkpoint) {
            return Ok(outcome);
        }
        if !checkpoint.completed_steps.is_empty() {
            info!(
                run_id,
                completed = checkpoint.completed_steps.len(),
                "Resuming run from checkpoint"
            );
        }

        for step in checkpoint.descriptor.steps() {
            if checkpoint.is_completed(step) {
                continue;
            }
            if let Some(outcome) = self.execute_step(checkpoint, step).await? {
                return Ok(outcome);
            }
        }

        checkpoint.mark_completed();
        self.persist(checkpoint).await?;
        self.projector.run_completed(run_id).await;
        self.credentials.forget(&checkpoint.descriptor.credential);
        Ok(RunOutcome::Completed)
    }

    /// Run one step with retries. Returns an outcome only when the run aborted.
    async fn execute_step(
        &self,
        checkpoint: &mut RunCheckpoint,
        step: StepId,
    ) -> Result<Option<RunOutcome>> {
        let run_id = checkpoint.run_id.clone();
        let mut attempt = 1;

        if let Some(pending) = checkpoint.pending_retry.clone().filter(|p| p.step == step) {
            attempt = pending.attempt;
            let remaining = (pending.resume_after - Utc::now()).to_std().unwrap_or_default();
            if !remaining.is_zero() {
                info!(run_id = %run_id, step = %step, attempt, "Honouring recorded backoff of {:?}", remaining);
                tokio::time::sleep(remaining).await;
            }
        }

        loop {
            self.projector.step_started(&run_id, step).await;

            let result = match StepInput::build(step, &checkpoint.descriptor, checkpoint.outputs()) {
                Ok(input) => self.runner.run_step(&run_id, input).await,
                Err(failure) => Err(failure),
            };

            let failure = match result {
                Ok(output) => {
                    checkpoint.record_output(output, attempt);
                    self.persist(checkpoint).await?;
                    self.projector.step_completed(&run_id, step).await;
                    return Ok(None);
                }
                Err(failure) => failure,
            };

            match self.retry.decide(&failure, attempt) {
                RetryDecision::Retry { delay } => {
                    self.projector
                        .step_retrying(&run_id, step, &failure, attempt, delay);
                    attempt += 1;
                    checkpoint.schedule_retry(PendingRetry {
                        step,
                        attempt,
                        resume_after: Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                        last_error: failure,
                    });
                    self.persist(checkpoint).await?;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Abort(reason) => {
                    if let AbortReason::Exhausted { attempts } = reason {
                        warn!(run_id = %run_id, step = %step, "Giving up after {} attempts", attempts);
                    }
                    checkpoint.mark_failed(step, failure.clone(), attempt);
                    self.persist(checkpoint).await?;
                    self.projector
                        .step_failed(&run_id, step, &failure, attempt)
                        .await;
                    self.credentials.forget(&checkpoint.descriptor.credential);
                    return Ok(Some(RunOutcome::Failed {
                        step,
                        failure,
                        attempts: attempt,
                    }));
                }
            }
        }
    }

    async fn persist(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        self.checkpoints.save(checkpoint).await.map_err(|e| {
            PilotError::workflow(
                ErrorCode::WORKFLOW_CHECKPOINT_ERROR,
                "Failed to save checkpoint",
                checkpoint.run_id.clone(),
            )
            .with_source(e)
        })
    }

    /// Rebuild status documents from stored checkpoints and continue every
    /// run that had not finished. Returns the ids of resumed runs.
    pub async fn resume_incomplete(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for run_id in self.checkpoints.list().await? {
            let checkpoint = match self.checkpoints.load(&run_id).await {
                Ok(Some(checkpoint)) => checkpoint,
                Ok(None) => continue,
                Err(e) => {
                    warn!(run_id = %run_id, "Skipping unreadable checkpoint: {}", e);
                    continue;
                }
            };

            self.store().insert_if_absent(checkpoint.to_run()).await;
            if !checkpoint.is_terminal() {
                info!(run_id = %run_id, next = ?checkpoint.next_step(), "Resuming incomplete run");
                self.spawn(run_id.clone());
                resumed.push(run_id);
            }
        }
        Ok(resumed)
    }

    /// Drop terminal runs older than `ttl` from the status store and
    /// delete their checkpoints
    pub async fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let purged = self.store().purge_expired(ttl).await;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        for run_id in self.checkpoints.list().await? {
            if let Ok(Some(checkpoint)) = self.checkpoints.load(&run_id).await {
                if checkpoint.is_terminal() && checkpoint.updated_at < cutoff {
                    self.checkpoints.delete(&run_id).await?;
                }
            }
        }
        Ok(purged)
    }

    /// Periodically purge expired runs until the task is aborted
    pub fn spawn_sweeper(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match engine.purge_expired(ttl).await {
                    Ok(0) => {}
                    Ok(purged) => info!("Purged {} expired runs", purged),
                    Err(e) => warn!("Run retention sweep failed: {}", e),
                }
            }
        })
    }
}

fn terminal_outcome(checkpoint: &RunCheckpoint) -> Option<RunOutcome> {
    use super::checkpoint::CheckpointStatus;

    match checkpoint.status {
        CheckpointStatus::Running => None,
        CheckpointStatus::Completed => Some(RunOutcome::Completed),
        CheckpointStatus::Failed => checkpoint.failure.as_ref().map(|recorded| RunOutcome::Failed {
            step: recorded.step,
            failure: recorded.failure.clone(),
            attempts: recorded.attempts,
        }),
    }
}
