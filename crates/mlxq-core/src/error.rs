//! Error types for the mlxq core.
//!
//! Every failure a front-end can observe maps to one variant here. None of them
//! are fatal to the hosting process: callers turn them into a message and a
//! job state transition.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the mlxq core.
#[derive(Debug, Error)]
pub enum MlxqError {
    // Input errors
    #[error("Invalid model source: {message}")]
    InvalidSource { message: String },

    #[error("Invalid quantization setting {field}: {message}")]
    ConfigValidation { field: String, message: String },

    // Output errors
    #[error("Could not prepare output directory {path:?}: {message}")]
    Allocation {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Job errors
    #[error("A conversion is already in progress ({running_id})")]
    ConcurrentJob { running_id: String },

    #[error("Failed to launch {program}: {message}")]
    ProcessSpawn {
        program: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Conversion failed: {message}")]
    ConversionFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Conversion cancelled by user")]
    ConversionCancelled,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for mlxq operations.
pub type Result<T> = std::result::Result<T, MlxqError>;

impl From<std::io::Error> for MlxqError {
    fn from(err: std::io::Error) -> Self {
        MlxqError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MlxqError {
    fn from(err: serde_json::Error) -> Self {
        MlxqError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MlxqError {
    /// Create an IO error with a short context and the path involved.
    pub fn io(context: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        MlxqError::Io {
            message: format!("{context}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error for a quantization field.
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MlxqError::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the interpreter or the tool is not installed.
    ///
    /// Front-ends show a "dependency missing" hint for these instead of a
    /// generic failure.
    pub fn is_dependency_missing(&self) -> bool {
        match self {
            MlxqError::ProcessSpawn {
                source: Some(source),
                ..
            } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    /// Stable snake_case tag for the error kind.
    pub fn category(&self) -> &'static str {
        match self {
            MlxqError::InvalidSource { .. } => "invalid_source",
            MlxqError::ConfigValidation { .. } => "config_validation",
            MlxqError::Allocation { .. } => "allocation",
            MlxqError::ConcurrentJob { .. } => "concurrent_job",
            MlxqError::ProcessSpawn { .. } if self.is_dependency_missing() => "dependency_missing",
            MlxqError::ProcessSpawn { .. } => "process_spawn",
            MlxqError::ConversionFailed { .. } => "conversion_failed",
            MlxqError::ConversionCancelled => "cancelled",
            MlxqError::Io { .. } | MlxqError::FileNotFound(_) => "io",
            MlxqError::Json { .. } => "json",
            MlxqError::Config { .. } => "config",
            MlxqError::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MlxqError::ConcurrentJob {
            running_id: "conv-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "A conversion is already in progress (conv-1)"
        );
    }

    #[test]
    fn test_dependency_missing() {
        let err = MlxqError::ProcessSpawn {
            program: "python3".into(),
            message: "not found".into(),
            source: Some(std::io::Error::from(std::io::ErrorKind::NotFound)),
        };
        assert!(err.is_dependency_missing());
        assert_eq!(err.category(), "dependency_missing");

        let err = MlxqError::ProcessSpawn {
            program: "python3".into(),
            message: "broken pipe".into(),
            source: Some(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        };
        assert!(!err.is_dependency_missing());
        assert_eq!(err.category(), "process_spawn");
    }

    #[test]
    fn test_io_context() {
        let err = MlxqError::io(
            "reading settings",
            "/tmp/settings.json",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("reading settings"));
        assert_eq!(err.category(), "io");
    }
}
