//! Durable run checkpoints
//!
//! A checkpoint is rewritten after every step outcome. It holds only plain
//! data: the run descriptor (with a credential *reference*), the outputs of
//! completed steps in order, and any pending retry. Resuming a run replays
//! from it and re-executes only the step that was in flight.

use super::classifier::{StepFailure, Verdict};
use super::descriptor::RunDescriptor;
use super::steps::StepOutput;
use crate::error::{ErrorCode, PilotError, Result};
use crate::status::{FailureClassification, Run, RunError, StepId, StepStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, info};

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Running,
    Completed,
    Failed,
}

/// Output of a step that finished successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step: StepId,
    pub output: StepOutput,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// A retry that was scheduled but has not run yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRetry {
    pub step: StepId,
    /// The attempt number to run next (1-based)
    pub attempt: u32,
    /// Do not start the attempt before this instant
    pub resume_after: DateTime<Utc>,
    pub last_error: StepFailure,
}

/// The failure that ended a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFailure {
    pub step: StepId,
    pub failure: StepFailure,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub version: u32,
    pub run_id: String,
    pub descriptor: RunDescriptor,
    pub completed_steps: Vec<CompletedStep>,
    pub pending_retry: Option<PendingRetry>,
    pub status: CheckpointStatus,
    pub failure: Option<RecordedFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn new(run_id: impl Into<String>, descriptor: RunDescriptor) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            run_id: run_id.into(),
            descriptor,
            completed_steps: Vec::new(),
            pending_retry: None,
            status: CheckpointStatus::Running,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != CheckpointStatus::Running
    }

    pub fn is_completed(&self, step: StepId) -> bool {
        self.completed_steps.iter().any(|c| c.step == step)
    }

    /// First step of the pipeline without a recorded output
    pub fn next_step(&self) -> Option<StepId> {
        self.descriptor
            .steps()
            .into_iter()
            .find(|step| !self.is_completed(*step))
    }

    pub fn outputs(&self) -> impl Iterator<Item = &StepOutput> + Clone {
        self.completed_steps.iter().map(|c| &c.output)
    }

    pub fn record_output(&mut self, output: StepOutput, attempts: u32) {
        let step = output.step();
        self.completed_steps.retain(|c| c.step != step);
        self.completed_steps.push(CompletedStep {
            step,
            output,
            attempts,
            completed_at: Utc::now(),
        });
        self.pending_retry = None;
        self.touch();
    }

    pub fn schedule_retry(&mut self, retry: PendingRetry) {
        self.pending_retry = Some(retry);
        self.touch();
    }

    pub fn mark_failed(&mut self, step: StepId, failure: StepFailure, attempts: u32) {
        self.status = CheckpointStatus::Failed;
        self.pending_retry = None;
        self.failure = Some(RecordedFailure {
            step,
            failure,
            attempts,
        });
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.status = CheckpointStatus::Completed;
        self.pending_retry = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Rebuild the polling document after a restart
    pub fn to_run(&self) -> Run {
        let mut run = Run::new(self.run_id.clone(), &self.descriptor.steps(), self.created_at);
        for completed in &self.completed_steps {
            for status in [StepStatus::Running, StepStatus::Completed] {
                if let Some(next) =
                    run.with_step_status(completed.step, status, None, completed.completed_at)
                {
                    run = next;
                }
            }
        }

        match (&self.status, &self.failure) {
            (CheckpointStatus::Failed, Some(recorded)) => {
                let error = RunError::new(recorded.failure.message.clone(), Some(recorded.step))
                    .with_classification(FailureClassification {
                        category: recorded.failure.kind,
                        verdict: Verdict::Fatal,
                        attempts: recorded.attempts,
                    });
                run.with_error(error, self.updated_at).unwrap_or(run)
            }
            (CheckpointStatus::Completed, _) => run.with_completion(self.updated_at).unwrap_or(run),
            _ => run,
        }
    }
}

/// Storage backend for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()>;

    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>>;

    /// Ids of every stored checkpoint
    async fn list(&self) -> Result<Vec<String>>;

    async fn delete(&self, run_id: &str) -> Result<()>;
}

fn check_version(checkpoint: &RunCheckpoint) -> Result<()> {
    if checkpoint.version > CHECKPOINT_VERSION {
        return Err(PilotError::workflow(
            ErrorCode::WORKFLOW_INCOMPATIBLE_CHECKPOINT,
            format!(
                "Checkpoint version {} is newer than supported version {}",
                checkpoint.version, CHECKPOINT_VERSION
            ),
            checkpoint.run_id.clone(),
        ));
    }
    Ok(())
}

/// One JSON file per run, replaced atomically on every save
pub struct FileCheckpointStore {
    storage_path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    fn checkpoint_path(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PilotError::validation(
                ErrorCode::VALIDATION_INVALID_FORMAT,
                format!("'{run_id}' is not a valid run id"),
                Some("runId"),
            ));
        }
        Ok(self.storage_path.join(format!("{run_id}{CHECKPOINT_SUFFIX}")))
    }
}

fn storage_error(
    message: String,
    path: &std::path::Path,
    err: impl std::error::Error + Send + Sync + 'static,
) -> PilotError {
    PilotError::storage_with_code(ErrorCode::STORAGE_IO_ERROR, message, Some(path.to_path_buf()))
        .with_source(err)
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        let checkpoint_path = self.checkpoint_path(&checkpoint.run_id)?;
        let temp_path = checkpoint_path.with_extension("tmp");

        fs::create_dir_all(&self.storage_path).await.map_err(|e| {
            storage_error(
                "Failed to create checkpoint directory".to_string(),
                &self.storage_path,
                e,
            )
        })?;

        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&temp_path, json).await.map_err(|e| {
            storage_error("Failed to write checkpoint to temp file".to_string(), &temp_path, e)
        })?;
        fs::rename(&temp_path, &checkpoint_path).await.map_err(|e| {
            storage_error(
                "Failed to move checkpoint to final location".to_string(),
                &checkpoint_path,
                e,
            )
        })?;

        debug!(
            "Saved checkpoint for run {} ({} steps completed)",
            checkpoint.run_id,
            checkpoint.completed_steps.len()
        );
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let checkpoint_path = self.checkpoint_path(run_id)?;
        let content = match fs::read_to_string(&checkpoint_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(storage_error(
                    "Failed to read checkpoint file".to_string(),
                    &checkpoint_path,
                    e,
                ))
            }
        };

        let checkpoint: RunCheckpoint = serde_json::from_str(&content).map_err(|e| {
            PilotError::storage_with_code(
                ErrorCode::STORAGE_CORRUPTED,
                format!("Failed to parse checkpoint for run {run_id}"),
                Some(checkpoint_path.clone()),
            )
            .with_source(e)
        })?;
        check_version(&checkpoint)?;
        Ok(Some(checkpoint))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut checkpoints = Vec::new();
        let mut entries = match fs::read_dir(&self.storage_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(checkpoints),
            Err(e) => {
                return Err(storage_error(
                    "Failed to list checkpoints".to_string(),
                    &self.storage_path,
                    e,
                ))
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(CHECKPOINT_SUFFIX))
            {
                checkpoints.push(run_id.to_string());
            }
        }
        checkpoints.sort();
        Ok(checkpoints)
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        let checkpoint_path = self.checkpoint_path(run_id)?;
        match fs::remove_file(&checkpoint_path).await {
            Ok(()) => {
                info!("Deleted checkpoint for run {}", run_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(
                "Failed to delete checkpoint".to_string(),
                &checkpoint_path,
                e,
            )),
        }
    }
}

/// Checkpoints kept in memory; survives engine restarts within one process
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, RunCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let checkpoint = self
            .checkpoints
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(run_id)
            .cloned();
        if let Some(checkpoint) = &checkpoint {
            check_version(checkpoint)?;
        }
        Ok(checkpoint)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .checkpoints
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialRef;
    use crate::status::RunStatus;
    use crate::workflow::steps::InitializeOutput;
    use crate::workflow::FailureKind;
    use tempfile::TempDir;

    fn checkpoint() -> RunCheckpoint {
        let descriptor = RunDescriptor::new(
            "Fix the README",
            "https://github.com/acme/widgets",
            CredentialRef::env("GITHUB_TOKEN"),
            None,
        )
        .unwrap();
        RunCheckpoint::new("run-1", descriptor)
    }

    fn init_output() -> StepOutput {
        StepOutput::Initialize(InitializeOutput {
            repo_url: "https://github.com/acme/widgets".into(),
            repo_info: "origin".into(),
        })
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());

        let mut saved = checkpoint();
        saved.record_output(init_output(), 1);
        store.save(&saved).await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.list().await.unwrap(), vec!["run-1".to_string()]);
        assert!(!temp_dir.path().join("run-1.checkpoint.tmp").exists());

        store.delete("run-1").await.unwrap();
        assert!(store.load("run-1").await.unwrap().is_none());
        store.delete("run-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());

        let mut future = checkpoint();
        future.version = CHECKPOINT_VERSION + 1;
        store.save(&future).await.unwrap();

        let err = store.load("run-1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WORKFLOW_INCOMPATIBLE_CHECKPOINT);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("run-1.checkpoint.json"), "{ not json").unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());

        let err = store.load("run-1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::STORAGE_CORRUPTED);
    }

    #[tokio::test]
    async fn test_run_id_cannot_escape_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());
        assert!(store.load("../etc/passwd").await.is_err());
    }

    #[test]
    fn test_next_step_skips_completed() {
        let mut checkpoint = checkpoint();
        assert_eq!(checkpoint.next_step(), Some(StepId::InitializeSandbox));
        checkpoint.record_output(init_output(), 2);
        assert_eq!(checkpoint.next_step(), Some(StepId::AnalyzeRepository));
        assert_eq!(checkpoint.completed_steps[0].attempts, 2);
    }

    #[test]
    fn test_to_run_restores_failure() {
        let mut checkpoint = checkpoint();
        checkpoint.record_output(init_output(), 1);
        checkpoint.mark_failed(
            StepId::AnalyzeRepository,
            StepFailure::new(FailureKind::Auth, "bad credentials"),
            1,
        );

        let run = checkpoint.to_run();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.steps[0].status, StepStatus::Completed);
        assert_eq!(run.steps[1].status, StepStatus::Failed);
        assert_eq!(run.steps[2].status, StepStatus::Pending);
        let error = run.error.unwrap();
        assert_eq!(error.step_id, Some(StepId::AnalyzeRepository));
        assert_eq!(error.classification.unwrap().category, FailureKind::Auth);
    }
}
