//! In-memory result store for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{ResultStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Expiring map with write notification.
///
/// - Expired entries are invisible to `get`; every `set` drops them
/// - Every `set` wakes `wait_for_update` callers, so pollers see results
///   without waiting out their tick
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    entries: Mutex<HashMap<String, Entry>>,
    written: Notify,
    offline: AtomicBool,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|e| e.values().filter(|entry| entry.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.lock()?;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        drop(entries);
        self.written.notify_waiters();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn wait_for_update(&self, _key: &str, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.written.notified()).await;
    }
}
