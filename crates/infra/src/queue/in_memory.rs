//! In-memory job queue for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use byteme_core::Job;

use super::{Delivery, JobQueue, NackOutcome, QueueError, encode_job};

#[derive(Debug, Clone)]
struct Entry {
    body: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, Entry>,
    dead_letters: Vec<Entry>,
    next_tag: u64,
}

/// In-process queue with broker-like semantics.
///
/// - FIFO; a nacked job goes back to the head
/// - Unacknowledged jobs stay in flight until acked, nacked or released
/// - Can be switched offline to exercise "queue unavailable" paths
#[derive(Debug)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    notify: Notify,
    max_deliveries: u32,
    offline: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_deliveries,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with `Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Jobs waiting to be fetched.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Jobs fetched but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Bodies of dead-lettered jobs, oldest first.
    pub fn dead_letters(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.dead_letters.iter().map(|e| e.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Enqueue a body as-is, bypassing job encoding.
    pub fn publish_raw(&self, body: impl Into<String>) -> Result<(), QueueError> {
        self.check_online()?;
        self.lock()?.ready.push_back(Entry {
            body: body.into(),
            deliveries: 0,
        });
        self.notify.notify_one();
        Ok(())
    }

    /// Return every in-flight job to the head of the queue, as a broker does
    /// when a consumer disconnects without acknowledging.
    pub fn release_in_flight(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let mut released: Vec<(u64, Entry)> = state
            .in_flight
            .drain()
            .map(|(tag, entry)| (tag_seq(&tag), entry))
            .collect();
        released.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        let count = released.len();
        for (_, entry) in released {
            state.ready.push_front(entry);
        }
        drop(state);
        for _ in 0..count {
            self.notify.notify_one();
        }
        count
    }

    fn check_online(&self) -> Result<(), QueueError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(QueueError::Unavailable("in-memory queue is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))
    }

    fn try_take(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock()?;
        let Some(mut entry) = state.ready.pop_front() else {
            return Ok(None);
        };
        entry.deliveries += 1;
        state.next_tag += 1;
        let tag = format!("mem-{}", state.next_tag);
        let delivery = Delivery {
            tag: tag.clone(),
            body: entry.body.clone(),
            attempts: entry.deliveries,
        };
        state.in_flight.insert(tag, entry);
        Ok(Some(delivery))
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

fn tag_seq(tag: &str) -> u64 {
    tag.trim_start_matches("mem-").parse().unwrap_or(0)
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, job: &Job) -> Result<(), QueueError> {
        self.check_online()?;
        let body = encode_job(job)?;
        self.lock()?.ready.push_back(Entry {
            body,
            deliveries: 0,
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn fetch(&self, _consumer: &str, block: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + block;
        loop {
            self.check_online()?;
            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_online()?;
        self.lock()?
            .in_flight
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.tag.clone()))
    }

    async fn nack(&self, delivery: Delivery) -> Result<NackOutcome, QueueError> {
        self.check_online()?;
        let mut state = self.lock()?;
        let entry = state
            .in_flight
            .remove(&delivery.tag)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.tag.clone()))?;

        if entry.deliveries >= self.max_deliveries {
            state.dead_letters.push(entry);
            return Ok(NackOutcome::DeadLettered);
        }

        state.ready.push_front(entry);
        drop(state);
        self.notify.notify_one();
        Ok(NackOutcome::Requeued)
    }
}
