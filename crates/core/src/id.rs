//! Job identifiers and the result-store keys derived from them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of every result-store key.
pub const RESULT_KEY_PREFIX: &str = "result:";

/// Identifier of a job.
///
/// Either the client-supplied `timestamp` (no uniqueness guarantee) or a
/// gateway-minted UUIDv7, depending on the gateway's identifier policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mint a fresh, collision-resistant identifier (UUIDv7, time-ordered).
    pub fn mint() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which this job's outcome is stored.
    pub fn result_key(&self) -> ResultKey {
        ResultKey(format!("{RESULT_KEY_PREFIX}{}", self.0))
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A result-store key of the form `result:<job id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey(String);

impl ResultKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResultKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
