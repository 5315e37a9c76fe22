//! Error taxonomy shared by the pipeline stages.
//!
//! [`AuditError`] is what the stages return. Only `Configuration`,
//! `Cancelled`, and an `EmbeddingUnavailable` raised while building the
//! guidance index abort a run; everything else is isolated to one file or
//! one chunk and recorded in the report.
//!
//! [`ProviderError`] is what the external embedding and reasoning providers
//! return. It keeps throttling distinguishable from hard failures so the
//! retry layer backs off only when it makes sense.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    /// A file could not be tokenized into valid blocks.
    #[error("parse error in {}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The embedding provider exhausted its retries or failed hard.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The reasoning call failed or its response broke the output contract.
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    /// A required setting is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two embeddings from different models were compared.
    #[error("embedding model mismatch: expected '{expected}', got '{actual}'")]
    ModelVersionMismatch { expected: String, actual: String },

    /// The run was cancelled before completion.
    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl AuditError {
    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        AuditError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Whether this error ends the whole run rather than one unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::Configuration(_) | AuditError::Cancelled(_)
        )
    }
}

/// Failure reported by an external provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limited (HTTP 429 or provider-specific throttling).
    #[error("throttled: {0}")]
    Throttled(String),

    /// Server error or network failure; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The per-call timeout elapsed.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Client error, bad credentials, or a malformed response.
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Fatal(_))
    }

    /// Classify an HTTP status code the way both provider families do:
    /// 429 throttles, 5xx is transient, anything else is fatal.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body);
        match status {
            429 => ProviderError::Throttled(message),
            500..=599 => ProviderError::Transient(message),
            _ => ProviderError::Fatal(message),
        }
    }
}
