//! Code-modification agent abstraction
//!
//! The agent edits files inside a live session; the pipeline only sees its
//! textual summary.

use crate::session::Session;
use crate::workflow::StepFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What the agent is asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    /// Files the analysis step expects to be relevant
    pub candidate_files: Vec<String>,
}

/// What the agent reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub summary: String,
}

/// Trait for the external code-modification agent
#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Apply the requested change to the checkout behind `session`
    async fn apply(
        &self,
        session: &dyn Session,
        request: &AgentRequest,
    ) -> Result<AgentResponse, StepFailure>;
}

/// Runs the Claude CLI non-interactively inside the session checkout
pub struct ClaudeCliAgent {
    program: String,
}

impl ClaudeCliAgent {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_prompt(request: &AgentRequest) -> String {
        if request.candidate_files.is_empty() {
            return request.prompt.clone();
        }
        format!(
            "{}\n\nFiles most likely relevant: {}",
            request.prompt,
            request.candidate_files.join(", ")
        )
    }
}

impl Default for ClaudeCliAgent {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl CodingAgent for ClaudeCliAgent {
    async fn apply(
        &self,
        session: &dyn Session,
        request: &AgentRequest,
    ) -> Result<AgentResponse, StepFailure> {
        let prompt = Self::build_prompt(request);
        info!("Running {} agent on {} candidate files", self.program, request.candidate_files.len());
        debug!("Agent prompt: {}", prompt);

        let output = session
            .run_checked(
                &self.program,
                &["--print", "--dangerously-skip-permissions", &prompt],
                &self.program,
            )
            .await?;

        Ok(AgentResponse {
            summary: output.stdout.trim().to_string(),
        })
    }
}
