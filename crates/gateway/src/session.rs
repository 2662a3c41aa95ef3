//! One client connection's submission lifecycle.
//!
//! For every inbound text message the session:
//! 1. parses and validates it as a `Submission` (errors → `error` frame)
//! 2. publishes a `Job` (queue failure → `error` frame, no polling)
//! 3. sends `received` with the job id
//! 4. polls `result:<job id>` until an outcome shows up, the store fails,
//!    or the poll window runs out
//!
//! Frames go to an unbounded channel drained by the socket writer; a closed
//! channel means the client left and polling stops. Messages are handled
//! strictly one after another.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use byteme_core::{ExecutionOutcome, Job, JobId, ResultKey, StatusFrame, Submission};
use byteme_infra::config::{JobIdPolicy, PollSettings, Settings};
use byteme_infra::queue::JobQueue;
use byteme_infra::result_store::ResultStore;

/// The client is gone; nothing more can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct Disconnected;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll: PollSettings,
    pub job_ids: JobIdPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            job_ids: JobIdPolicy::ClientSupplied,
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll: settings.poll,
            job_ids: settings.job_ids,
        }
    }
}

pub struct Session {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
    config: SessionConfig,
    outbound: UnboundedSender<StatusFrame>,
}

impl Session {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        config: SessionConfig,
        outbound: UnboundedSender<StatusFrame>,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            outbound,
        }
    }

    /// Connection setup: make sure the result store is reachable.
    ///
    /// On failure the caller sends the returned error frame and closes.
    pub async fn open(&self) -> Result<(), StatusFrame> {
        self.store.ping().await.map_err(|e| {
            warn!(error = %e, "result store unreachable at connection setup");
            StatusFrame::error(format!("Service unavailable: {e}"))
        })
    }

    /// Handle one inbound text message to completion.
    pub async fn handle_text(&self, text: &str) -> Result<(), Disconnected> {
        let submission = match Submission::parse(text) {
            Ok(submission) => submission,
            Err(e) => {
                debug!(error = %e, "rejected submission");
                return self.emit(StatusFrame::error(e.to_string()));
            }
        };

        let job = self.job_for(submission);
        let job_id = job.id();

        if let Err(e) = self.queue.publish(&job).await {
            warn!(job_id = %job_id, error = %e, "failed to enqueue job");
            return self.emit(StatusFrame::error(format!("Failed to submit code: {e}")));
        }
        info!(job_id = %job_id, "job enqueued");

        self.emit(StatusFrame::received(job_id.clone()))?;
        self.poll(&job_id).await
    }

    fn job_for(&self, submission: Submission) -> Job {
        let window = self.config.poll.window();
        let deadline = Utc::now() + chrono::Duration::milliseconds(window.as_millis() as i64);
        let job = Job::new(submission).with_deadline(deadline);
        match self.config.job_ids {
            JobIdPolicy::ClientSupplied => job,
            JobIdPolicy::ServerMinted => job.with_job_id(JobId::mint()),
        }
    }

    /// Bounded poll: one `running` frame per tick, early re-checks when the
    /// store signals a write.
    async fn poll(&self, job_id: &JobId) -> Result<(), Disconnected> {
        let key = job_id.result_key();
        let interval = self.config.poll.interval;

        for _ in 0..self.config.poll.attempts {
            if let Some(frame) = self.check(&key).await {
                return self.emit(frame);
            }
            self.emit(StatusFrame::running())?;

            let tick_end = Instant::now() + interval;
            loop {
                let remaining = tick_end.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.store.wait_for_update(key.as_str(), remaining).await;
                if Instant::now() >= tick_end {
                    break;
                }
                if let Some(frame) = self.check(&key).await {
                    return self.emit(frame);
                }
            }
        }

        info!(job_id = %job_id, "gave up waiting for result");
        self.emit(StatusFrame::timed_out())
    }

    /// A terminal frame when the outcome is available or the store failed.
    async fn check(&self, key: &ResultKey) -> Option<StatusFrame> {
        match self.store.get(key.as_str()).await {
            Ok(None) => None,
            Ok(Some(raw)) => match ExecutionOutcome::from_json(&raw) {
                Ok(outcome) => {
                    debug!(key = %key, returncode = outcome.returncode, "result available");
                    Some(StatusFrame::completed(&outcome))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "unreadable result");
                    Some(StatusFrame::error(format!("Unreadable result: {e}")))
                }
            },
            Err(e) => {
                warn!(key = %key, error = %e, "result store failed while polling");
                Some(StatusFrame::error(format!("Failed to fetch result: {e}")))
            }
        }
    }

    fn emit(&self, frame: StatusFrame) -> Result<(), Disconnected> {
        self.outbound.send(frame).map_err(|_| Disconnected)
    }
}
