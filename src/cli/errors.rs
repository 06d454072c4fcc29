use thiserror::Error;

use crate::app::AppError;

/// Errors surfaced by cli commands
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Prompt failed: {0}")]
    Prompt(#[from] inquire::InquireError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CliError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: format!("{err:#}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::invalid_input("File not found"),
            std::io::ErrorKind::PermissionDenied => Self::invalid_input("Permission denied"),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {err}"))
    }
}

impl From<crate::search::SearchError> for CliError {
    fn from(err: crate::search::SearchError) -> Self {
        Self::App(err.into())
    }
}
