//! `byteme-core`: data model shared by the gateway and the workers.
//!
//! This crate contains **pure** types (no I/O): what a client submits, what
//! travels on the job queue, what a worker stores, and what the gateway streams
//! back to the client.

pub mod error;
pub mod frame;
pub mod id;
pub mod outcome;
pub mod submission;

pub use error::SubmissionError;
pub use frame::{FrameKind, FrameStatus, StatusFrame};
pub use id::{JobId, ResultKey};
pub use outcome::{ExecutionLimits, ExecutionOutcome};
pub use submission::{Job, Submission};
