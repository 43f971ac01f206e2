//! Error types for pipeline runs
//!
//! Only failures that stop a whole run live here. Per-message failures are
//! logged and skipped, and semantic-service failures degrade to heuristics
//! before they ever reach this layer.
//! - Retryable: mail source unreachable
//! - NonRetryable: store failures, bad configuration
//! - RequiresUserAction: mail source not authenticated

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Gmail service not authenticated")]
    NotAuthenticated,

    #[error("Mail source error: {0}")]
    Mail(String),

    #[error("Store error: {0}")]
    Store(#[from] DbError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Mail(_))
    }

    pub fn requires_user_action(&self) -> bool {
        matches!(self, PipelineError::NotAuthenticated)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PipelineError::NotAuthenticated => {
                "Place a valid Google OAuth token at ~/.capsules/google/token.json."
            }
            PipelineError::Mail(_) => "Check your internet connection and try again.",
            PipelineError::Store(_) => "Check the database path and file permissions.",
            PipelineError::Configuration(_) => "Check your configuration in ~/.capsules/config.json",
        }
    }
}

/// Serializable error representation for reports
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&PipelineError> for RunError {
    fn from(err: &PipelineError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        RunError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
