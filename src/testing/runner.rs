//! Step runner driven by a script instead of real collaborators

use super::mocks::lock;
use crate::status::StepId;
use crate::workflow::steps::{
    AnalyzeOutput, ChangeSummary, ExecuteOutput, InitializeOutput, NotifyOutput, PublishOutput,
    RepositoryAnalysis,
};
use crate::workflow::{StepFailure, StepInput, StepOutput, StepRunner};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Canned successful output for a step
pub fn sample_output(step: StepId) -> StepOutput {
    let changes = ChangeSummary {
        prompt: "Fix the README".to_string(),
        files_modified: vec!["README.md".to_string()],
        candidate_files: vec!["README.md".to_string()],
        branch: "ai-change-1-abcdef01".to_string(),
        timestamp: Utc::now(),
        agent_response: "edited 1 files".to_string(),
    };
    match step {
        StepId::InitializeSandbox => StepOutput::Initialize(InitializeOutput {
            repo_url: "https://github.com/acme/widgets".to_string(),
            repo_info: "origin\thttps://github.com/acme/widgets (fetch)".to_string(),
        }),
        StepId::AnalyzeRepository => StepOutput::Analyze(AnalyzeOutput {
            files_to_modify: vec!["README.md".to_string()],
            analysis: RepositoryAnalysis {
                prompt: "Fix the README".to_string(),
                repo_info: String::new(),
                root_structure: "README.md\nsrc\n".to_string(),
                suggested_files: vec!["README.md".to_string()],
                timestamp: Utc::now(),
            },
        }),
        StepId::ExecuteChanges => StepOutput::Execute(ExecuteOutput {
            branch: changes.branch.clone(),
            changes,
        }),
        StepId::CreatePullRequest => StepOutput::Publish(PublishOutput {
            pr_url: "https://github.com/acme/widgets/pull/1".to_string(),
            pr_number: 1,
            branch: "ai-change-1-abcdef01".to_string(),
        }),
        StepId::NotifyUser => StepOutput::Notify(NotifyOutput {
            notification_id: "notif_1".to_string(),
            status: "sent".to_string(),
        }),
    }
}

/// Succeeds with [`sample_output`] unless a failure or hang was scripted
#[derive(Default)]
pub struct ScriptedRunner {
    failures: Mutex<HashMap<StepId, VecDeque<StepFailure>>>,
    calls: Mutex<HashMap<StepId, u32>>,
    inputs: Mutex<Vec<StepInput>>,
    hang_on: Mutex<Option<StepId>>,
    hung: Notify,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next invocation of `step`
    pub fn fail(&self, step: StepId, failure: StepFailure) {
        lock(&self.failures)
            .entry(step)
            .or_default()
            .push_back(failure);
    }

    /// Never return from the next invocation of `step`
    pub fn hang_once(&self, step: StepId) {
        *lock(&self.hang_on) = Some(step);
    }

    /// Resolves once a scripted hang has been entered
    pub async fn wait_until_hung(&self) {
        self.hung.notified().await;
    }

    pub fn calls(&self, step: StepId) -> u32 {
        lock(&self.calls).get(&step).copied().unwrap_or(0)
    }

    pub fn inputs(&self) -> Vec<StepInput> {
        lock(&self.inputs).clone()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run_step(&self, _run_id: &str, input: StepInput) -> Result<StepOutput, StepFailure> {
        let step = input.step();
        *lock(&self.calls).entry(step).or_default() += 1;
        lock(&self.inputs).push(input);

        let hang = {
            let mut hang_on = lock(&self.hang_on);
            if *hang_on == Some(step) {
                hang_on.take().is_some()
            } else {
                false
            }
        };
        if hang {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }

        let failure = lock(&self.failures)
            .get_mut(&step)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(failure) => Err(failure),
            None => Ok(sample_output(step)),
        }
    }
}
