//! Error types shared across the analysis pipeline.
//!
//! Subsystem-local errors live next to their subsystem (`QueueError`,
//! `PoolError`, `DatabaseError`). This module holds the ones that cross
//! module boundaries:
//! - LLM API interactions
//! - Bias classification
//! - Per-job processing

use std::time::Duration;

use thiserror::Error;

use crate::storage::DatabaseError;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors returned by a bias classifier.
///
/// Every variant is recovered by the fallback estimator; none of them is
/// ever surfaced to the job queue.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Invalid classification response: {0}")]
    InvalidResponse(String),

    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised while processing a single analysis job.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The analysis store could not be read or written.
    #[error("Analysis store unavailable: {0}")]
    Store(#[from] DatabaseError),

    /// The article referenced by the job does not exist.
    #[error("Article '{0}' not found")]
    ArticleNotFound(String),
}

impl ProcessError {
    /// Returns whether the queue should schedule another attempt.
    ///
    /// A missing article will not appear on retry, so it is dead-lettered
    /// immediately instead of burning backoff cycles.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Store(_) => true,
            ProcessError::ArticleNotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::ApiError {
            code: 503,
            message: "overloaded".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_classifier_error_from_llm() {
        let err: ClassifierError = LlmError::RequestFailed("connection refused".to_string()).into();
        assert!(matches!(err, ClassifierError::Llm(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_process_error_retryable() {
        let missing = ProcessError::ArticleNotFound("a-1".to_string());
        assert!(!missing.is_retryable());
        assert!(missing.to_string().contains("a-1"));

        let store = ProcessError::Store(DatabaseError::ConnectionFailed("down".to_string()));
        assert!(store.is_retryable());
    }
}
