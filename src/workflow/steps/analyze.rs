//! Analyze: inspect the checkout and guess which files the change touches

use crate::session::{SessionDescriptor, SessionFactory};
use crate::workflow::StepFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryAnalysis {
    pub prompt: String,
    pub repo_info: String,
    pub root_structure: String,
    pub suggested_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOutput {
    pub files_to_modify: Vec<String>,
    pub analysis: RepositoryAnalysis,
}

/// Keyword table: any keyword present in the prompt adds its paths
const KEYWORD_PATHS: &[(&[&str], &[&str])] = &[
    (
        &["homepage", "page"],
        &["app/page.tsx", "index.tsx", "pages/index.tsx"],
    ),
    (&["component", "button"], &["components/", "src/components/"]),
    (&["style", "css"], &["styles/", "app/globals.css"]),
    (&["readme"], &["README.md"]),
    (&["package", "dependency"], &["package.json"]),
];

const FALLBACK_PATHS: &[&str] = &["app/", "src/"];

/// Candidate files for a prompt, in table order, without duplicates
pub fn candidate_files(prompt: &str) -> Vec<String> {
    let prompt = prompt.to_lowercase();
    let mut files: Vec<String> = Vec::new();

    for (keywords, paths) in KEYWORD_PATHS {
        if keywords.iter().any(|k| prompt.contains(k)) {
            for path in *paths {
                if !files.iter().any(|f| f == path) {
                    files.push((*path).to_string());
                }
            }
        }
    }

    if files.is_empty() {
        files = FALLBACK_PATHS.iter().map(|p| (*p).to_string()).collect();
    }
    files
}

pub async fn run(
    sessions: &dyn SessionFactory,
    descriptor: &SessionDescriptor,
    prompt: &str,
    repo_info: &str,
) -> Result<AnalyzeOutput, StepFailure> {
    let session = sessions
        .open(descriptor)
        .await
        .map_err(|f| f.context("Failed to analyze repository"))?;
    let listing = session
        .run_checked("ls", &["-la", "."], "ls")
        .await
        .map_err(|f| f.context("Failed to analyze repository"))?;

    let files_to_modify = candidate_files(prompt);
    info!("Suggested files to modify: {:?}", files_to_modify);

    Ok(AnalyzeOutput {
        files_to_modify: files_to_modify.clone(),
        analysis: RepositoryAnalysis {
            prompt: prompt.to_string(),
            repo_info: repo_info.to_string(),
            root_structure: listing.stdout,
            suggested_files: files_to_modify,
            timestamp: Utc::now(),
        },
    })
}
