//! Client submissions and the jobs that carry them across the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SubmissionError;
use crate::id::{JobId, ResultKey};

/// A client's request to run `code`.
///
/// `timestamp` is client-chosen and doubles as the job identifier unless the
/// gateway mints its own. It is not checked for uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub code: String,
    pub timestamp: String,
}

impl Submission {
    pub fn new(code: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Parse an inbound client frame.
    ///
    /// A numeric `timestamp` (e.g. `Date.now()` from a browser) is accepted and
    /// kept as its decimal text. An empty `code` is a valid (empty) program;
    /// an empty `timestamp` counts as missing since it cannot key a result.
    pub fn parse(text: &str) -> Result<Self, SubmissionError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| SubmissionError::invalid_json(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &JsonValue) -> Result<Self, SubmissionError> {
        let fields = value.as_object().ok_or(SubmissionError::NotAnObject)?;

        let code = match fields.get("code") {
            Some(JsonValue::String(s)) => s.clone(),
            _ => return Err(SubmissionError::MissingField("code")),
        };

        let timestamp = match fields.get("timestamp") {
            Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => return Err(SubmissionError::MissingField("timestamp")),
        };

        Ok(Self { code, timestamp })
    }
}

/// A submission as carried on the job queue.
///
/// The wire form is the submission's own JSON object, optionally extended with
/// `job_id` (gateway-minted identifier) and `deadline` (when the submitting
/// client stops polling; informational, execution limits do not depend on
/// it). Producers that only send `{code, timestamp}` are
/// still understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(flatten)]
    pub submission: Submission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(submission: Submission) -> Self {
        Self {
            submission,
            job_id: None,
            deadline: None,
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn code(&self) -> &str {
        &self.submission.code
    }

    /// The identifier outcomes are keyed by: the minted id when present,
    /// otherwise the client's timestamp.
    pub fn id(&self) -> JobId {
        match &self.job_id {
            Some(id) => id.clone(),
            None => JobId::from(self.submission.timestamp.as_str()),
        }
    }

    pub fn result_key(&self) -> ResultKey {
        self.id().result_key()
    }

    /// Serialize to the queue body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a queue body.
    pub fn decode(body: &str) -> Result<Self, SubmissionError> {
        let value: JsonValue =
            serde_json::from_str(body).map_err(|e| SubmissionError::invalid_json(e.to_string()))?;
        let submission = Submission::from_value(&value)?;

        let job_id = match value.get("job_id") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) if !s.is_empty() => Some(JobId::from(s.as_str())),
            Some(other) => {
                return Err(SubmissionError::invalid_field(
                    "job_id",
                    format!("expected non-empty string, got {other}"),
                ));
            }
        };

        let deadline = match value.get("deadline") {
            None | Some(JsonValue::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<DateTime<Utc>>(raw.clone())
                    .map_err(|e| SubmissionError::invalid_field("deadline", e.to_string()))?,
            ),
        };

        Ok(Self {
            submission,
            job_id,
            deadline,
        })
    }
}
