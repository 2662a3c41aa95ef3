//! Submission gateway: WebSocket intake, job hand-off and result polling.

pub mod app;
pub mod session;
