//! Failure classification for pipeline steps
//!
//! Collaborators report failures as a closed set of [`FailureKind`] categories
//! at the point where the failure is observed (an HTTP status, a process spawn
//! error, a missing credential). The engine never inspects message text to
//! decide between retrying and aborting; [`classify`] is a pure function of the
//! category alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credential rejected, expired, or unresolvable
    Auth,
    /// Rate limit or resource quota exhausted
    Quota,
    /// Environment or platform misconfiguration (missing binary, bad settings)
    Config,
    /// Malformed input that no retry can fix (bad repository locator, rejected payload)
    Validation,
    /// Operation exceeded its deadline
    NetworkTimeout,
    /// Remote endpoint refused or dropped the connection
    ConnectionRefused,
    /// Remote service reported a transient outage (5xx, overloaded)
    ServiceUnavailable,
    /// Anything a collaborator could not categorize
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::Quota => "quota",
            FailureKind::Config => "config",
            FailureKind::Validation => "validation",
            FailureKind::NetworkTimeout => "network_timeout",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::ServiceUnavailable => "service_unavailable",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the engine may retry a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Retryable,
    Fatal,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Retryable => f.write_str("retryable"),
            Verdict::Fatal => f.write_str("fatal"),
        }
    }
}

/// Map a failure category to a verdict.
///
/// `Unknown` is retryable here; the retry policy caps it separately
/// (see [`super::retry::RetryPolicy::attempt_limit`]).
pub fn classify(kind: FailureKind) -> Verdict {
    match kind {
        FailureKind::Auth | FailureKind::Quota | FailureKind::Config | FailureKind::Validation => {
            Verdict::Fatal
        }
        FailureKind::NetworkTimeout
        | FailureKind::ConnectionRefused
        | FailureKind::ServiceUnavailable
        | FailureKind::Unknown => Verdict::Retryable,
    }
}

/// A typed failure raised by a step or one of its collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Auth, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Config, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message)
    }

    pub fn verdict(&self) -> Verdict {
        classify(self.kind)
    }

    /// Prefix the message with what the step was doing
    pub fn context(mut self, what: impl fmt::Display) -> Self {
        self.message = format!("{what}: {}", self.message);
        self
    }

    /// Categorize an HTTP error response.
    ///
    /// `quota_exhausted` is true when the host signalled an exhausted rate
    /// limit through response headers, which turns a 403 into a quota failure.
    pub fn from_http_status(status: u16, quota_exhausted: bool, message: impl Into<String>) -> Self {
        let kind = match status {
            403 if quota_exhausted => FailureKind::Quota,
            401 | 403 => FailureKind::Auth,
            429 => FailureKind::Quota,
            408 => FailureKind::NetworkTimeout,
            400 | 404 | 409 | 422 => FailureKind::Validation,
            500..=599 => FailureKind::ServiceUnavailable,
            _ => FailureKind::Unknown,
        };
        Self::new(kind, message)
    }

    /// Categorize a local process spawn error
    pub fn from_spawn_error(program: &str, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                FailureKind::Config
            }
            std::io::ErrorKind::TimedOut => FailureKind::NetworkTimeout,
            _ => FailureKind::Unknown,
        };
        Self::new(kind, format!("failed to run {program}: {err}"))
    }
}

impl From<reqwest::Error> for StepFailure {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::NetworkTimeout
        } else if err.is_connect() {
            FailureKind::ConnectionRefused
        } else if let Some(status) = err.status() {
            return StepFailure::from_http_status(status.as_u16(), false, err.to_string());
        } else if err.is_builder() {
            FailureKind::Config
        } else {
            FailureKind::Unknown
        };
        StepFailure::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [FailureKind; 8] = [
        FailureKind::Auth,
        FailureKind::Quota,
        FailureKind::Config,
        FailureKind::Validation,
        FailureKind::NetworkTimeout,
        FailureKind::ConnectionRefused,
        FailureKind::ServiceUnavailable,
        FailureKind::Unknown,
    ];

    #[test]
    fn test_permanent_conditions_are_fatal() {
        assert_eq!(classify(FailureKind::Auth), Verdict::Fatal);
        assert_eq!(classify(FailureKind::Quota), Verdict::Fatal);
        assert_eq!(classify(FailureKind::Config), Verdict::Fatal);
        assert_eq!(classify(FailureKind::Validation), Verdict::Fatal);
    }

    #[test]
    fn test_transient_conditions_are_retryable() {
        assert_eq!(classify(FailureKind::NetworkTimeout), Verdict::Retryable);
        assert_eq!(classify(FailureKind::ConnectionRefused), Verdict::Retryable);
        assert_eq!(classify(FailureKind::ServiceUnavailable), Verdict::Retryable);
    }

    #[test]
    fn test_verdict_ignores_message_text() {
        for kind in ALL_KINDS {
            let a = StepFailure::new(kind, "HTTP 400 while talking to upstream");
            let b = StepFailure::new(kind, "connection timed out (503)");
            assert_eq!(a.verdict(), b.verdict(), "kind {kind} must be deterministic");
        }
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(StepFailure::from_http_status(401, false, "").kind, FailureKind::Auth);
        assert_eq!(StepFailure::from_http_status(403, false, "").kind, FailureKind::Auth);
        assert_eq!(StepFailure::from_http_status(403, true, "").kind, FailureKind::Quota);
        assert_eq!(StepFailure::from_http_status(429, false, "").kind, FailureKind::Quota);
        assert_eq!(
            StepFailure::from_http_status(422, false, "").kind,
            FailureKind::Validation
        );
        assert_eq!(
            StepFailure::from_http_status(502, false, "").kind,
            FailureKind::ServiceUnavailable
        );
        assert_eq!(StepFailure::from_http_status(302, false, "").kind, FailureKind::Unknown);
    }

    #[test]
    fn test_spawn_error_mapping() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let failure = StepFailure::from_spawn_error("git", &missing);
        assert_eq!(failure.kind, FailureKind::Config);
        assert!(failure.message.contains("git"));
    }

    #[test]
    fn test_context_prefixes_message() {
        let failure = StepFailure::auth("bad token").context("Failed to initialize sandbox");
        assert_eq!(failure.message, "Failed to initialize sandbox: bad token");
        assert_eq!(failure.kind, FailureKind::Auth);
    }
}
