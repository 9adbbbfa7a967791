//! Error types for CloudPuff.
//!
//! This module defines the error types used throughout CloudPuff, providing
//! rich error information for debugging and user feedback.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for CloudPuff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for CloudPuff.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Template Errors
    // ========================================================================
    /// Error raised while constructing or compiling a template.
    #[error("{message}{}", in_file(.filename))]
    Template {
        /// Error message
        message: String,
        /// Template file being processed, when known
        filename: Option<PathBuf>,
    },

    /// YAML syntax error with the offending source line.
    #[error("{message}\n  in \"{filename}\", line {line}, column {column}\n{snippet}")]
    TemplateSyntax {
        /// Parser message
        message: String,
        /// Template file name
        filename: String,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// Source line followed by a caret
        snippet: String,
    },

    /// A `Meta.Tags` entry cannot be turned into a stack tag.
    #[error("Invalid value for tag \"{tag}\": {message}")]
    InvalidTag {
        /// Tag name
        tag: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Stack Errors
    // ========================================================================
    /// A stack lookup did not yield exactly one stack.
    #[error("{0}")]
    StackLookup(String),

    /// A stack output required by a lookup parameter is missing.
    #[error("Unable to find the output \"{output}\" in the stack \"{stack}\"")]
    OutputNotFound {
        /// Stack name
        stack: String,
        /// Output name
        output: String,
    },

    /// Stack creation or update ended in a failed state.
    #[error("Stack \"{stack}\" ended with status {status}")]
    StackFailed {
        /// Stack name
        stack: String,
        /// Final stack status
        status: String,
    },

    /// An update was requested but the stack already matches the template.
    #[error("No updates are to be performed")]
    StackUpdateNotRequired,

    /// Waiting for a stack or an image exceeded the configured timeout.
    #[error("Timed out after {timeout_mins} minutes waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// Timeout in minutes
        timeout_mins: u64,
    },

    // ========================================================================
    // AWS Errors
    // ========================================================================
    /// An AWS API call failed.
    #[error("{operation} failed: {message}")]
    Aws {
        /// API operation
        operation: String,
        /// Error message reported by the service
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Invalid command line input.
    #[error("{0}")]
    InvalidInput(String),

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// YAML error outside of template loading.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

fn in_file(filename: &Option<PathBuf>) -> String {
    match filename {
        Some(path) => format!(" (in \"{}\")", path.display()),
        None => String::new(),
    }
}

impl Error {
    /// Creates a new template error without file information.
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
            filename: None,
        }
    }

    /// Creates a new AWS error from an operation name and a message.
    pub fn aws(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Aws {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Attaches a file name to a template error that does not carry one yet.
    ///
    /// Errors from nested imports keep the innermost file name.
    pub fn with_filename(self, path: &Path) -> Self {
        match self {
            Self::Template {
                message,
                filename: None,
            } => Self::Template {
                message,
                filename: Some(path.to_path_buf()),
            },
            other => other,
        }
    }

    /// Returns true for errors raised while reading or compiling a template.
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            Error::Template { .. } | Error::TemplateSyntax { .. } | Error::InvalidTag { .. }
        )
    }
}
