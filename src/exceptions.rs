//! Error types for the extraction engine.
//!
//! Every failure surfaced by this crate carries a stable machine-readable
//! kind (for callers that route on error class) alongside the human-readable
//! message. Retryability is a property of the kind, not of call sites.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Error taxonomy for the extraction pipeline.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Invalid configuration detected at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Prompt + requested completion exceeds the model context window.
    /// Never retried and never silently truncated.
    #[error(
        "context overflow: estimated {estimated} tokens exceeds maximum {max} \
         (excess {excess}); reduce prompt by ~{excess} tokens"
    )]
    ContextOverflow {
        /// Estimated prompt (+ completion) tokens.
        estimated: usize,
        /// The budget that was exceeded.
        max: usize,
        /// How far over budget the request is.
        excess: usize,
    },

    /// A single entity or relationship failed schema validation.
    /// Recovered locally: the item is dropped and counted.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Timeout, 5xx, or connection reset from the backend. Retryable.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Non-retryable backend failure: 4xx, open circuit, exhausted retries.
    #[error("backend error: {0}")]
    FatalBackend(String),

    /// GPU memory pressure or rate-bucket wait exceeded. Treated as
    /// transient for retry purposes.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// Deadline expired or the caller cancelled the extraction.
    #[error("extraction cancelled: {0}")]
    Cancelled(String),

    /// Operation attempted before the backend connection reached READY.
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    /// A prompt template could not be loaded.
    #[error("prompt template error: {0}")]
    PromptTemplate(String),
}

impl ExtractError {
    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::SchemaViolation(_) => "schema_violation",
            Self::TransientBackend(_) => "transient_backend",
            Self::FatalBackend(_) => "fatal_backend",
            Self::Resource(_) => "resource",
            Self::Cancelled(_) => "cancelled",
            Self::ModelNotLoaded(_) => "model_not_loaded",
            Self::PromptTemplate(_) => "prompt_template",
        }
    }

    /// Whether the retry loop may attempt this operation again.
    ///
    /// Resource pressure counts as transient; context overflow and schema
    /// violations never do (retrying an identical request cannot help).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientBackend(_) | Self::Resource(_))
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::TransientBackend(err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                Self::TransientBackend(format!("server returned {status}"))
            } else {
                Self::FatalBackend(format!("server returned {status}"))
            }
        } else {
            Self::TransientBackend(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ExtractError::Config("x".into()).kind(), "config");
        assert_eq!(
            ExtractError::ContextOverflow { estimated: 10, max: 5, excess: 5 }.kind(),
            "context_overflow"
        );
        assert_eq!(
            ExtractError::TransientBackend("x".into()).kind(),
            "transient_backend"
        );
    }

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(ExtractError::TransientBackend("timeout".into()).is_retryable());
        assert!(ExtractError::Resource("bucket empty".into()).is_retryable());
        assert!(!ExtractError::FatalBackend("400".into()).is_retryable());
        assert!(!ExtractError::Cancelled("deadline".into()).is_retryable());
        assert!(
            !ExtractError::ContextOverflow { estimated: 10, max: 5, excess: 5 }.is_retryable()
        );
    }

    #[test]
    fn context_overflow_message_carries_remediation() {
        let err = ExtractError::ContextOverflow { estimated: 1200, max: 1000, excess: 200 };
        let msg = err.to_string();
        assert!(msg.contains("excess 200"));
        assert!(msg.contains("reduce prompt by ~200 tokens"));
    }
}
