use std::path::PathBuf;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, suggestions_for, ErrorCode};

/// The unified error type for patchpilot
#[derive(Error, Debug)]
pub enum PilotError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Workflow error: {message}")]
    Workflow {
        code: u16,
        message: String,
        run_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Validation error: {message}")]
    Validation {
        code: u16,
        message: String,
        field: Option<String>,
    },
}

impl PilotError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with default code
    pub fn storage(message: impl Into<String>) -> Self {
        Self::storage_with_code(ErrorCode::STORAGE_GENERIC, message, None)
    }

    /// Create a storage error with specific code and path
    pub fn storage_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create a workflow error bound to a run
    pub fn workflow(code: u16, message: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::Workflow {
            code,
            message: message.into(),
            run_id: Some(run_id.into()),
            source: None,
        }
    }

    /// Create a validation error for a specific request field
    pub fn validation(code: u16, message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Shorthand for a missing required field
    pub fn missing_field(field: &str) -> Self {
        Self::validation(
            ErrorCode::VALIDATION_REQUIRED_FIELD,
            format!("{field} is required"),
            Some(field),
        )
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Workflow { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::Validation { .. } => {}
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Storage { code, .. }
            | Self::Workflow { code, .. }
            | Self::Validation { code, .. } => *code,
        }
    }

    /// Stable machine-readable category name, used as `errorType` on the API
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::Storage { .. } => "storage_error",
            Self::Workflow { .. } => "workflow_error",
            Self::Validation { .. } => "validation_error",
        }
    }

    /// The request field a validation error refers to
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {message}"),
            Self::Storage { message, path, .. } => match path {
                Some(p) => format!("Storage error at {}: {message}", p.display()),
                None => format!("Storage error: {message}"),
            },
            Self::Workflow {
                message, run_id, ..
            } => match run_id {
                Some(id) => format!("Run {id}: {message}"),
                None => message.clone(),
            },
            Self::Validation { message, .. } => message.clone(),
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Storage { .. } => 4,
            Self::Workflow { .. } => 6,
            Self::Validation { .. } => 8,
        }
    }
}

/// Type alias for Results using PilotError
pub type Result<T> = std::result::Result<T, PilotError>;

impl From<std::io::Error> for PilotError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::STORAGE_NOT_FOUND,
            _ => ErrorCode::STORAGE_IO_ERROR,
        };
        PilotError::storage_with_code(code, "I/O operation failed", None).with_source(err)
    }
}

impl From<serde_json::Error> for PilotError {
    fn from(err: serde_json::Error) -> Self {
        PilotError::storage_with_code(
            ErrorCode::STORAGE_SERIALIZATION_ERROR,
            "Invalid JSON document",
            None,
        )
        .with_source(err)
    }
}

impl From<toml::de::Error> for PilotError {
    fn from(err: toml::de::Error) -> Self {
        PilotError::config_with_code(ErrorCode::CONFIG_INVALID_TOML, "Invalid TOML syntax")
            .with_source(err)
    }
}
