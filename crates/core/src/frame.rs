//! Status frames streamed to the client.

use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::outcome::ExecutionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Received,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Status,
    Output,
}

/// One message to the client. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub status: FrameStatus,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl StatusFrame {
    fn status(status: FrameStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: FrameKind::Status,
            result: None,
            job_id: None,
        }
    }

    pub fn received(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::status(FrameStatus::Received, "Code submitted for execution")
        }
    }

    pub fn running() -> Self {
        Self::status(FrameStatus::Running, "Code is executing")
    }

    pub fn completed(outcome: &ExecutionOutcome) -> Self {
        Self {
            status: FrameStatus::Completed,
            message: "Execution completed".to_string(),
            kind: FrameKind::Output,
            result: Some(outcome.combined_output()),
            job_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::status(FrameStatus::Error, message)
    }

    pub fn timed_out() -> Self {
        Self::error("Execution timed out")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, FrameStatus::Completed | FrameStatus::Error)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completed_frame_wire_shape() {
        let frame = StatusFrame::completed(&ExecutionOutcome::new("hi\n", "", 0));
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "completed",
                "message": "Execution completed",
                "type": "output",
                "result": "hi\n",
            })
        );
    }

    #[test]
    fn status_frames_omit_result() {
        let value: serde_json::Value =
            serde_json::from_str(&StatusFrame::timed_out().to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"status": "error", "message": "Execution timed out", "type": "status"})
        );
        assert!(StatusFrame::timed_out().is_terminal());
        assert!(!StatusFrame::running().is_terminal());
    }

    #[test]
    fn received_frame_carries_job_id() {
        let frame = StatusFrame::received(JobId::from("t1"));
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["job_id"], "t1");
        assert_eq!(value["type"], "status");
    }
}
