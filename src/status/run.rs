//! Run and step progress documents served to polling clients

use crate::workflow::{FailureKind, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed pipeline steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepId {
    InitializeSandbox,
    AnalyzeRepository,
    ExecuteChanges,
    CreatePullRequest,
    NotifyUser,
}

impl StepId {
    const CORE: [StepId; 4] = [
        StepId::InitializeSandbox,
        StepId::AnalyzeRepository,
        StepId::ExecuteChanges,
        StepId::CreatePullRequest,
    ];

    /// Step sequence for a run; Notify is only part of it with a recipient
    pub fn pipeline(has_recipient: bool) -> Vec<StepId> {
        let mut steps = Self::CORE.to_vec();
        if has_recipient {
            steps.push(StepId::NotifyUser);
        }
        steps
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::InitializeSandbox => "initializeSandbox",
            StepId::AnalyzeRepository => "analyzeRepository",
            StepId::ExecuteChanges => "executeChanges",
            StepId::CreatePullRequest => "createPullRequest",
            StepId::NotifyUser => "notifyUser",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializeSandbox" => Ok(StepId::InitializeSandbox),
            "analyzeRepository" => Ok(StepId::AnalyzeRepository),
            "executeChanges" => Ok(StepId::ExecuteChanges),
            "createPullRequest" => Ok(StepId::CreatePullRequest),
            "notifyUser" => Ok(StepId::NotifyUser),
            other => Err(format!("unknown step '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    /// Position in `pending -> running -> {completed | failed}`
    fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: StepId,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    fn pending(id: StepId) -> Self {
        Self {
            id,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Classification metadata attached to a run failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureClassification {
    pub category: FailureKind,
    pub verdict: Verdict,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<FailureClassification>,
}

impl RunError {
    pub fn new(message: impl Into<String>, step_id: Option<StepId>) -> Self {
        Self {
            message: message.into(),
            step_id,
            classification: None,
        }
    }

    pub fn with_classification(mut self, classification: FailureClassification) -> Self {
        self.classification = Some(classification);
        self
    }
}

/// Progress document for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, steps: &[StepId], now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            steps: steps.iter().copied().map(StepRecord::pending).collect(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn step(&self, id: StepId) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Apply a step transition. Returns `None` when nothing changes:
    /// unknown step, a regression, a repeated status, or a terminal run.
    ///
    /// A step reported failed fails the whole run, but only when every later
    /// step is still pending; otherwise the report is ignored.
    pub fn with_step_status(
        &self,
        id: StepId,
        status: StepStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Run> {
        if self.status.is_terminal() {
            return None;
        }
        let index = self.steps.iter().position(|s| s.id == id)?;
        if status == StepStatus::Failed {
            if !self.can_fail(index) {
                return None;
            }
            let message = error.unwrap_or("step failed");
            return Some(self.frozen_at(index, RunError::new(message, Some(id)), now));
        }
        if status.rank() <= self.steps[index].status.rank() {
            return None;
        }

        let mut next = self.clone();
        let record = &mut next.steps[index];
        record.status = status;
        if record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if status.is_terminal() {
            record.completed_at = Some(now);
        }
        next.updated_at = now;
        Some(next)
    }

    /// Freeze the run as failed.
    ///
    /// The named step is marked failed when it can still fail; otherwise the
    /// failure lands on the first unfinished step after all started work.
    /// Completed steps are never reverted, so a run whose steps all completed
    /// refuses the error.
    pub fn with_error(&self, error: RunError, now: DateTime<Utc>) -> Option<Run> {
        if self.status.is_terminal() {
            return None;
        }
        let named = error
            .step_id
            .and_then(|id| self.steps.iter().position(|s| s.id == id))
            .filter(|&index| self.can_fail(index));
        let index = named.or_else(|| (0..self.steps.len()).find(|&index| self.can_fail(index)))?;
        Some(self.frozen_at(index, error, now))
    }

    /// A step can fail while it is unfinished and nothing after it has left
    /// pending
    fn can_fail(&self, index: usize) -> bool {
        !self.steps[index].status.is_terminal()
            && self.steps[index + 1..]
                .iter()
                .all(|s| s.status == StepStatus::Pending)
    }

    fn frozen_at(&self, index: usize, error: RunError, now: DateTime<Utc>) -> Run {
        let mut next = self.clone();
        let record = &mut next.steps[index];
        record.status = StepStatus::Failed;
        record.started_at.get_or_insert(now);
        record.completed_at = Some(now);
        record.error = Some(error.message.clone());

        next.error = Some(RunError {
            step_id: Some(record.id),
            ..error
        });
        next.status = RunStatus::Failed;
        next.updated_at = now;
        next.completed_at = Some(now);
        next
    }

    /// Mark the run completed, backfilling unfinished steps.
    ///
    /// Steps whose completion was never observed (pending or still running)
    /// are shown as completed so a polling UI ends on a fully green pipeline.
    pub fn with_completion(&self, now: DateTime<Utc>) -> Option<Run> {
        if self.status.is_terminal() {
            return None;
        }

        let mut next = self.clone();
        for record in &mut next.steps {
            if record.status != StepStatus::Completed {
                record.status = StepStatus::Completed;
                record.completed_at.get_or_insert(now);
            }
        }
        next.status = RunStatus::Completed;
        next.updated_at = now;
        next.completed_at = Some(now);
        Some(next)
    }
}
