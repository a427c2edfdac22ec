/// Error code registry for patchpilot
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Storage errors
/// - 5000-5999: Workflow errors
/// - 7000-7999: Validation errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_TOML: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;

    // Storage errors (3000-3999)
    pub const STORAGE_GENERIC: u16 = 3000;
    pub const STORAGE_IO_ERROR: u16 = 3001;
    pub const STORAGE_NOT_FOUND: u16 = 3004;
    pub const STORAGE_CORRUPTED: u16 = 3006;
    pub const STORAGE_SERIALIZATION_ERROR: u16 = 3011;

    // Workflow errors (5000-5999)
    pub const WORKFLOW_RUN_NOT_FOUND: u16 = 5001;
    pub const WORKFLOW_CHECKPOINT_ERROR: u16 = 5008;
    pub const WORKFLOW_INCOMPATIBLE_CHECKPOINT: u16 = 5013;

    // Validation errors (7000-7999)
    pub const VALIDATION_GENERIC: u16 = 7000;
    pub const VALIDATION_REQUIRED_FIELD: u16 = 7001;
    pub const VALIDATION_INVALID_FORMAT: u16 = 7005;
    pub const VALIDATION_UNSUPPORTED_HOST: u16 = 7010;
    pub const VALIDATION_INVALID_ACTION: u16 = 7011;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid TOML syntax in configuration",
        1005 => "Invalid value in configuration",

        3000 => "Generic storage error",
        3001 => "Storage I/O error",
        3004 => "Storage item not found",
        3006 => "Storage data is corrupted",
        3011 => "Storage serialization error",

        5001 => "Workflow run not found",
        5008 => "Workflow checkpoint error",
        5013 => "Checkpoint written by a newer version",

        7000 => "Generic validation error",
        7001 => "Required field is missing",
        7005 => "Invalid format",
        7010 => "Repository host is not supported",
        7011 => "Unknown status action",

        _ => "Unknown error code",
    }
}

/// Remediation hints surfaced to API clients alongside an error code
pub fn suggestions_for(code: u16, field: Option<&str>) -> Vec<String> {
    match (code, field) {
        (ErrorCode::VALIDATION_REQUIRED_FIELD, Some("prompt")) => vec![
            "Describe the change you want in the `prompt` field".to_string(),
            "Example: \"Add a footer to the homepage\"".to_string(),
        ],
        (ErrorCode::VALIDATION_REQUIRED_FIELD, Some("repoLocator")) => vec![
            "Provide the repository URL in `repoLocator`".to_string(),
            "Example: https://github.com/owner/repo".to_string(),
        ],
        (ErrorCode::VALIDATION_REQUIRED_FIELD, Some("credential")) => vec![
            "Provide a token with push and pull-request permissions in `credential`".to_string(),
        ],
        (ErrorCode::VALIDATION_INVALID_FORMAT, Some("repoLocator"))
        | (ErrorCode::VALIDATION_UNSUPPORTED_HOST, _) => vec![
            "Use an https URL of the form https://github.com/<owner>/<repo>".to_string(),
        ],
        (ErrorCode::VALIDATION_INVALID_ACTION, _) => vec![
            "Use one of: updateStep, setError, complete".to_string(),
        ],
        (ErrorCode::VALIDATION_INVALID_FORMAT, Some("stepId")) => vec![
            "Use one of: initializeSandbox, analyzeRepository, executeChanges, createPullRequest, notifyUser".to_string(),
        ],
        (ErrorCode::VALIDATION_INVALID_FORMAT, Some("status")) => vec![
            "Use one of: pending, running, completed, failed".to_string(),
        ],
        (ErrorCode::VALIDATION_INVALID_FORMAT, None) => {
            vec!["Send a JSON object body with Content-Type: application/json".to_string()]
        }
        _ => Vec::new(),
    }
}
