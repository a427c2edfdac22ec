//! The five pipeline steps and their plain inputs and outputs
//!
//! Inputs are rebuilt from the run descriptor plus recorded outputs every
//! time a step is invoked, which is what lets a resumed run replay from its
//! checkpoint without any live state.

pub mod analyze;
pub mod execute;
pub mod initialize;
pub mod notify;
pub mod publish;

pub use analyze::{AnalyzeOutput, RepositoryAnalysis};
pub use execute::{ChangeSummary, ExecuteOutput, GitSettings};
pub use initialize::InitializeOutput;
pub use notify::NotifyOutput;
pub use publish::PublishOutput;

use super::{RunDescriptor, StepFailure};
use crate::agent::CodingAgent;
use crate::credentials::{CredentialRef, CredentialVault};
use crate::host::{ChangeRequestHost, RepoLocator};
use crate::notify::Notifier;
use crate::session::{SessionDescriptor, SessionFactory};
use crate::status::StepId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Input of one step invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step")]
pub enum StepInput {
    #[serde(rename = "initializeSandbox")]
    Initialize { session: SessionDescriptor },
    #[serde(rename = "analyzeRepository")]
    Analyze {
        session: SessionDescriptor,
        prompt: String,
        repo_info: String,
    },
    #[serde(rename = "executeChanges")]
    Execute {
        session: SessionDescriptor,
        prompt: String,
        candidate_files: Vec<String>,
    },
    #[serde(rename = "createPullRequest")]
    Publish {
        repo: RepoLocator,
        credential: CredentialRef,
        changes: ChangeSummary,
    },
    #[serde(rename = "notifyUser")]
    Notify {
        recipient: String,
        pr_url: String,
        files: Vec<String>,
    },
}

/// Output of one successful step invocation, as stored in checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step")]
pub enum StepOutput {
    #[serde(rename = "initializeSandbox")]
    Initialize(InitializeOutput),
    #[serde(rename = "analyzeRepository")]
    Analyze(AnalyzeOutput),
    #[serde(rename = "executeChanges")]
    Execute(ExecuteOutput),
    #[serde(rename = "createPullRequest")]
    Publish(PublishOutput),
    #[serde(rename = "notifyUser")]
    Notify(NotifyOutput),
}

impl StepOutput {
    pub fn step(&self) -> StepId {
        match self {
            StepOutput::Initialize(_) => StepId::InitializeSandbox,
            StepOutput::Analyze(_) => StepId::AnalyzeRepository,
            StepOutput::Execute(_) => StepId::ExecuteChanges,
            StepOutput::Publish(_) => StepId::CreatePullRequest,
            StepOutput::Notify(_) => StepId::NotifyUser,
        }
    }
}

fn missing_output(step: StepId, needed: StepId) -> StepFailure {
    StepFailure::validation(format!(
        "cannot build input for {step}: no recorded output of {needed}"
    ))
}

impl StepInput {
    pub fn step(&self) -> StepId {
        match self {
            StepInput::Initialize { .. } => StepId::InitializeSandbox,
            StepInput::Analyze { .. } => StepId::AnalyzeRepository,
            StepInput::Execute { .. } => StepId::ExecuteChanges,
            StepInput::Publish { .. } => StepId::CreatePullRequest,
            StepInput::Notify { .. } => StepId::NotifyUser,
        }
    }

    /// Build a step's input from the descriptor and the outputs recorded so far
    pub fn build<'a>(
        step: StepId,
        descriptor: &RunDescriptor,
        outputs: impl IntoIterator<Item = &'a StepOutput> + Clone,
    ) -> Result<Self, StepFailure> {
        let initialized = || {
            outputs.clone().into_iter().find_map(|o| match o {
                StepOutput::Initialize(out) => Some(out),
                _ => None,
            })
        };
        let analyzed = || {
            outputs.clone().into_iter().find_map(|o| match o {
                StepOutput::Analyze(out) => Some(out),
                _ => None,
            })
        };
        let executed = || {
            outputs.clone().into_iter().find_map(|o| match o {
                StepOutput::Execute(out) => Some(out),
                _ => None,
            })
        };
        let published = || {
            outputs.clone().into_iter().find_map(|o| match o {
                StepOutput::Publish(out) => Some(out),
                _ => None,
            })
        };

        let input = match step {
            StepId::InitializeSandbox => StepInput::Initialize {
                session: descriptor.session(),
            },
            StepId::AnalyzeRepository => {
                let init = initialized()
                    .ok_or_else(|| missing_output(step, StepId::InitializeSandbox))?;
                StepInput::Analyze {
                    session: descriptor.session(),
                    prompt: descriptor.prompt.clone(),
                    repo_info: init.repo_info.clone(),
                }
            }
            StepId::ExecuteChanges => {
                let analysis =
                    analyzed().ok_or_else(|| missing_output(step, StepId::AnalyzeRepository))?;
                StepInput::Execute {
                    session: descriptor.session(),
                    prompt: descriptor.prompt.clone(),
                    candidate_files: analysis.files_to_modify.clone(),
                }
            }
            StepId::CreatePullRequest => {
                let execution =
                    executed().ok_or_else(|| missing_output(step, StepId::ExecuteChanges))?;
                StepInput::Publish {
                    repo: descriptor.repo.clone(),
                    credential: descriptor.credential.clone(),
                    changes: execution.changes.clone(),
                }
            }
            StepId::NotifyUser => {
                let recipient = descriptor.recipient.clone().ok_or_else(|| {
                    StepFailure::validation("notifyUser requires a recipient")
                })?;
                let publication =
                    published().ok_or_else(|| missing_output(step, StepId::CreatePullRequest))?;
                let files = executed()
                    .map(|e| e.changes.files_modified.clone())
                    .unwrap_or_default();
                StepInput::Notify {
                    recipient,
                    pr_url: publication.pr_url.clone(),
                    files,
                }
            }
        };
        Ok(input)
    }
}

/// Executes a single step invocation
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, run_id: &str, input: StepInput) -> Result<StepOutput, StepFailure>;
}

/// The production step runner, wired to real collaborators
pub struct Pipeline {
    sessions: Arc<dyn SessionFactory>,
    agent: Arc<dyn CodingAgent>,
    host: Arc<dyn ChangeRequestHost>,
    notifier: Arc<dyn Notifier>,
    credentials: Arc<CredentialVault>,
    git: GitSettings,
}

impl Pipeline {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        agent: Arc<dyn CodingAgent>,
        host: Arc<dyn ChangeRequestHost>,
        notifier: Arc<dyn Notifier>,
        credentials: Arc<CredentialVault>,
        git: GitSettings,
    ) -> Self {
        Self {
            sessions,
            agent,
            host,
            notifier,
            credentials,
            git,
        }
    }
}

#[async_trait]
impl StepRunner for Pipeline {
    async fn run_step(&self, run_id: &str, input: StepInput) -> Result<StepOutput, StepFailure> {
        debug!(run_id, step = %input.step(), "Invoking step");
        match input {
            StepInput::Initialize { session } => {
                initialize::run(
                    self.sessions.as_ref(),
                    self.host.as_ref(),
                    &self.credentials,
                    &session,
                )
                .await
                .map(StepOutput::Initialize)
            }
            StepInput::Analyze {
                session,
                prompt,
                repo_info,
            } => analyze::run(self.sessions.as_ref(), &session, &prompt, &repo_info)
                .await
                .map(StepOutput::Analyze),
            StepInput::Execute {
                session,
                prompt,
                candidate_files,
            } => execute::run(
                self.sessions.as_ref(),
                self.agent.as_ref(),
                &self.git,
                &session,
                &prompt,
                &candidate_files,
            )
            .await
            .map(StepOutput::Execute),
            StepInput::Publish {
                repo,
                credential,
                changes,
            } => publish::run(
                self.host.as_ref(),
                &self.credentials,
                &repo,
                &credential,
                &changes,
            )
            .await
            .map(StepOutput::Publish),
            StepInput::Notify {
                recipient,
                pr_url,
                files,
            } => notify::run(self.notifier.as_ref(), &recipient, &pr_url, &files)
                .await
                .map(StepOutput::Notify),
        }
    }
}
