//! Execute: let the agent edit a fresh checkout, then commit and push a branch

use crate::agent::{AgentRequest, CodingAgent};
use crate::session::{Session, SessionDescriptor, SessionFactory};
use crate::workflow::StepFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

pub const ACTIVITY_MARKER: &str = ".ai-activity.md";

/// Commit identity and staging rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// Globs never staged, even when the agent leaves them behind
    #[serde(default = "default_excluded_patterns")]
    pub excluded_patterns: Vec<String>,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            excluded_patterns: default_excluded_patterns(),
        }
    }
}

fn default_author_name() -> String {
    "AI Coding Agent".to_string()
}

fn default_author_email() -> String {
    "ai-agent@example.com".to_string()
}

fn default_excluded_patterns() -> Vec<String> {
    ["*.tar", "*.tar.gz", "*.tar.bz2", "*.tar.xz", "*.tgz", "*.tbz", "*.tbz2", "*.txz"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub prompt: String,
    /// Files in the pushed commit
    pub files_modified: Vec<String>,
    /// Files the analysis suggested
    pub candidate_files: Vec<String>,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
    pub agent_response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutput {
    pub branch: String,
    pub changes: ChangeSummary,
}

/// Unique per invocation, so a re-executed step never collides with a
/// branch pushed by an earlier attempt
pub fn new_branch_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ai-change-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// First `max` characters, on a char boundary
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub async fn run(
    sessions: &dyn SessionFactory,
    agent: &dyn CodingAgent,
    git: &GitSettings,
    descriptor: &SessionDescriptor,
    prompt: &str,
    candidate_files: &[String],
) -> Result<ExecuteOutput, StepFailure> {
    let session = sessions
        .open(descriptor)
        .await
        .map_err(|f| f.context("Failed to execute changes"))?;

    let response = agent
        .apply(
            session.as_ref(),
            &AgentRequest {
                prompt: prompt.to_string(),
                candidate_files: candidate_files.to_vec(),
            },
        )
        .await
        .map_err(|f| f.context("Coding agent failed"))?;
    debug!("Agent response: {}", response.summary);

    let branch = new_branch_name();
    let files_modified = commit_and_push(session.as_ref(), git, &branch, prompt)
        .await
        .map_err(|f| f.context("Failed to publish branch"))?;
    info!("Pushed {} files on branch {}", files_modified.len(), branch);

    Ok(ExecuteOutput {
        branch: branch.clone(),
        changes: ChangeSummary {
            prompt: prompt.to_string(),
            files_modified,
            candidate_files: candidate_files.to_vec(),
            branch,
            timestamp: Utc::now(),
            agent_response: response.summary,
        },
    })
}

/// Stage, commit and push on a new branch; returns the committed paths
async fn commit_and_push(
    session: &dyn Session,
    git: &GitSettings,
    branch: &str,
    prompt: &str,
) -> Result<Vec<String>, StepFailure> {
    session
        .run_checked("git", &["config", "user.email", &git.author_email], "git config")
        .await?;
    session
        .run_checked("git", &["config", "user.name", &git.author_name], "git config")
        .await?;
    session
        .run_checked("git", &["checkout", "-b", branch], "git checkout")
        .await?;

    let mut staged = stage(session, git).await?;
    if staged.is_empty() {
        info!("No changes detected, writing {}", ACTIVITY_MARKER);
        session
            .write_file(
                ACTIVITY_MARKER,
                &format!("AI Agent Activity: {}\n", Utc::now().to_rfc3339()),
            )
            .await?;
        staged = stage(session, git).await?;
    }

    let message = format!("AI: {}", truncate_chars(prompt, 50));
    session
        .run_checked("git", &["commit", "-m", &message], "git commit")
        .await?;
    session
        .run_checked("git", &["push", "origin", branch], "git push")
        .await?;

    Ok(staged)
}

async fn stage(session: &dyn Session, git: &GitSettings) -> Result<Vec<String>, StepFailure> {
    let exclusions: Vec<String> = git
        .excluded_patterns
        .iter()
        .map(|pattern| format!(":!{pattern}"))
        .collect();
    let mut args = vec!["add", "."];
    args.extend(exclusions.iter().map(String::as_str));
    session.run_checked("git", &args, "git add").await?;

    let diff = session
        .run_checked("git", &["diff", "--cached", "--name-only"], "git diff")
        .await?;
    Ok(diff
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_names_are_unique() {
        let a = new_branch_name();
        let b = new_branch_name();
        assert!(a.starts_with("ai-change-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn test_default_exclusions_cover_archives() {
        let git = GitSettings::default();
        assert!(git.excluded_patterns.contains(&"*.tar.gz".to_string()));
        assert_eq!(git.excluded_patterns.len(), 8);
    }
}
