use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use byteme_core::{ExecutionLimits, ExecutionOutcome, Job, JobId};

use crate::executor::CodeExecutor;
use crate::queue::{Delivery, JobQueue, NackOutcome};
use crate::result_store::ResultStore;

/// Execution worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name (unique per worker loop) and log label.
    pub name: String,
    /// Expiration of stored outcomes.
    pub result_ttl: Duration,
    /// Limits every job runs under.
    pub limits: ExecutionLimits,
    /// How long one fetch waits for a job before re-checking shutdown.
    pub fetch_block: Duration,
    /// Pause after a failed fetch (queue unreachable).
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            result_ttl: Duration::from_secs(3600),
            limits: ExecutionLimits::default(),
            fetch_block: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_fetch_block(mut self, block: Duration) -> Self {
        self.fetch_block = block;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    /// Outcomes stored with returncode 0.
    pub jobs_succeeded: u64,
    /// Outcomes stored with a non-zero returncode (incl. timeouts).
    pub jobs_failed: u64,
    /// Jobs rejected because their body could not be parsed.
    pub jobs_rejected: u64,
    /// Jobs given back because the outcome could not be stored.
    pub store_failures: u64,
    pub uptime_secs: u64,
}

/// What one delivery turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Outcome stored and job acknowledged (ack failures are logged only:
    /// a redelivery just overwrites the same key).
    Stored { job_id: JobId, returncode: i32 },
    /// Job body unreadable; negatively acknowledged.
    Rejected { reason: String, nack: Option<NackOutcome> },
    /// Outcome could not be stored; negatively acknowledged.
    StoreFailed { job_id: JobId, nack: Option<NackOutcome> },
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop fetching, wait for the in-flight job (if any) to finish, and
    /// return the final statistics.
    pub async fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "execution worker task failed");
            }
        }
        self.stats()
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Pulls one job at a time, runs it, stores the outcome, acknowledges.
///
/// Every dequeued job ends in exactly one of: a stored outcome followed by
/// an ack, or a nack (redelivery / dead-letter). Nothing a job does can stop
/// the loop.
pub struct ExecutionWorker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
    executor: Arc<dyn CodeExecutor>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl ExecutionWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        executor: Arc<dyn CodeExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            executor,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    /// Spawn the worker loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.config.name.clone();
        info!(worker = %name, "execution worker started");
        let started = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // An abandoned fetch may leave a job pending on this consumer;
            // the queue reclaims it once idle.
            let fetched = tokio::select! {
                _ = shutdown.changed() => break,
                fetched = self.queue.fetch(&name, self.config.fetch_block) => fetched,
            };

            match fetched {
                Ok(Some(delivery)) => {
                    let processed = self.process(delivery).await;
                    self.record(&processed, started);
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(worker = %name, error = %e, "failed to fetch job");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        }

        info!(worker = %name, "execution worker stopped");
    }

    /// Handle one delivery to completion.
    pub async fn process(&self, delivery: Delivery) -> Processed {
        let job = match Job::decode(&delivery.body) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    worker = %self.config.name,
                    delivery = %delivery.tag,
                    attempts = delivery.attempts,
                    error = %e,
                    "rejecting malformed job"
                );
                let reason = e.to_string();
                let nack = self.nack(delivery).await;
                return Processed::Rejected { reason, nack };
            }
        };

        let job_id = job.id();
        let outcome = self.execute(&job).await;

        let stored = match outcome.to_json() {
            Ok(payload) => self
                .store
                .set(job.result_key().as_str(), &payload, self.config.result_ttl)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = stored {
            error!(worker = %self.config.name, job_id = %job_id, error = %e, "failed to store outcome");
            let nack = self.nack(delivery).await;
            return Processed::StoreFailed { job_id, nack };
        }

        if let Err(e) = self.queue.ack(&delivery).await {
            warn!(worker = %self.config.name, job_id = %job_id, error = %e, "failed to acknowledge job");
        }

        debug!(worker = %self.config.name, job_id = %job_id, returncode = outcome.returncode, "job completed");
        Processed::Stored {
            job_id,
            returncode: outcome.returncode,
        }
    }

    /// Run the job's code; harness failures become outcomes, never errors.
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        // The deadline only says when the submitting client stops polling.
        // The job still runs under the full limit; its outcome stays stored.
        if let Some(deadline) = job.deadline {
            if deadline < Utc::now() {
                info!(job_id = %job.id(), %deadline, "client no longer waiting; running anyway");
            }
        }
        let limits = &self.config.limits;

        info!(
            worker = %self.config.name,
            job_id = %job.id(),
            limit_ms = limits.wall_clock.as_millis() as u64,
            "executing job"
        );

        match self.executor.run(job.code(), limits).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %job.id(), error = %e, "execution harness failed");
                ExecutionOutcome::harness_failure(e.to_string())
            }
        }
    }

    async fn nack(&self, delivery: Delivery) -> Option<NackOutcome> {
        let tag = delivery.tag.clone();
        match self.queue.nack(delivery).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                // Left pending; the queue reclaims it later.
                error!(worker = %self.config.name, delivery = %tag, error = %e, "failed to nack job");
                None
            }
        }
    }

    fn record(&self, processed: &Processed, started: Instant) {
        let Ok(mut s) = self.stats.lock() else {
            return;
        };
        s.jobs_processed += 1;
        s.uptime_secs = started.elapsed().as_secs();
        match processed {
            Processed::Stored { returncode: 0, .. } => s.jobs_succeeded += 1,
            Processed::Stored { .. } => s.jobs_failed += 1,
            Processed::Rejected { .. } => s.jobs_rejected += 1,
            Processed::StoreFailed { .. } => s.store_failures += 1,
        }
    }
}
