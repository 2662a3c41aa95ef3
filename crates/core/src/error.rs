//! Submission error model.

use thiserror::Error;

/// Why an inbound client message could not become a job.
///
/// Keep this focused on malformed input. Queue/store failures are
/// infrastructure concerns and live in `byteme-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The message was not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The message was JSON but not an object.
    #[error("Submission must be a JSON object")]
    NotAnObject,

    /// A required field was absent, empty, or of the wrong type.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A job payload carried an unreadable optional field.
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl SubmissionError {
    pub fn invalid_json(msg: impl Into<String>) -> Self {
        Self::InvalidJson(msg.into())
    }

    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
