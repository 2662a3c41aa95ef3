//! Execution outcomes and the limits they are produced under.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Return code used for every outcome synthesized by the worker rather than
/// reported by the child process.
pub const SYNTHETIC_FAILURE_CODE: i32 = 1;

/// Captured result of running one job's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl ExecutionOutcome {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, returncode: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            returncode,
        }
    }

    /// Outcome for a run killed at its wall-clock limit.
    ///
    /// Output of the partial run is not included.
    pub fn timed_out(limit: Duration) -> Self {
        Self::new(
            "",
            format!("Execution timed out after {}", describe_duration(limit)),
            SYNTHETIC_FAILURE_CODE,
        )
    }

    /// Outcome for a failure of the execution harness itself.
    pub fn harness_failure(reason: impl Into<String>) -> Self {
        Self::new("", reason, SYNTHETIC_FAILURE_CODE)
    }

    pub fn succeeded(&self) -> bool {
        self.returncode == 0
    }

    /// What the client sees: stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

fn describe_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        let secs = d.as_secs();
        if secs == 1 {
            "1 second".to_string()
        } else {
            format!("{secs} seconds")
        }
    } else {
        format!("{:.1} seconds", d.as_secs_f64())
    }
}

/// Bounds applied to one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Hard wall-clock limit; the process is killed when it elapses.
    pub wall_clock: Duration,
    /// Bytes kept per output stream; the rest is discarded.
    pub max_output_bytes: usize,
    /// Address-space cap for the child, if any.
    pub memory_bytes: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            wall_clock: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
            memory_bytes: None,
        }
    }
}

impl ExecutionLimits {
    pub fn with_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_memory_bytes(mut self, bytes: Option<u64>) -> Self {
        self.memory_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_outcome_matches_wire_contract() {
        let outcome = ExecutionOutcome::timed_out(Duration::from_secs(30));
        assert_eq!(
            outcome,
            ExecutionOutcome::new("", "Execution timed out after 30 seconds", 1)
        );
        assert!(!outcome.succeeded());
    }

    #[test]
    fn fractional_timeouts_are_described_with_one_decimal() {
        let outcome = ExecutionOutcome::timed_out(Duration::from_millis(14_300));
        assert_eq!(outcome.stderr, "Execution timed out after 14.3 seconds");
    }

    #[test]
    fn combined_output_is_stdout_then_stderr() {
        let outcome = ExecutionOutcome::new("hi\n", "warn\n", 0);
        assert_eq!(outcome.combined_output(), "hi\nwarn\n");
    }

    #[test]
    fn outcome_json_uses_wire_field_names() {
        let json = ExecutionOutcome::new("a", "b", 2).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, serde_json::json!({"stdout": "a", "stderr": "b", "returncode": 2}));
    }
}
