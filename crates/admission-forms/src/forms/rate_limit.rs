//! Sliding-window submission limits per (form, client).
//!
//! State lives behind [`RateLimitStore`] so a shared cache can replace the in-process
//! table without touching the pipeline. The in-memory store is not durable and is
//! local to one process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::schema::FormId;

pub const WINDOW: TimeDelta = TimeDelta::hours(1);
pub const COMPACTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub form_id: FormId,
    pub client_id: String,
}

impl RateLimitKey {
    pub fn new(form_id: &FormId, client_id: &str) -> Self {
        Self {
            form_id: form_id.clone(),
            client_id: client_id.to_string(),
        }
    }
}

/// Timestamp log per key. Operations on one key must be atomic with respect to each other.
pub trait RateLimitStore: Send + Sync {
    /// Number of events for `key` strictly newer than `cutoff`.
    fn count_since(&self, key: &RateLimitKey, cutoff: DateTime<Utc>) -> usize;
    fn append(&self, key: &RateLimitKey, at: DateTime<Utc>);
    /// Appends `at` only when fewer than `limit` events are newer than `cutoff`. The count
    /// and the append happen under one lock.
    fn try_append(&self, key: &RateLimitKey, cutoff: DateTime<Utc>, limit: usize, at: DateTime<Utc>) -> bool;
    /// Removes one event recorded at `at`, if present.
    fn remove(&self, key: &RateLimitKey, at: DateTime<Utc>);
    /// Drops events at or before `cutoff` and removes keys left empty. Returns the
    /// number of keys removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<RateLimitKey, VecDeque<DateTime<Utc>>>>,
}

impl InMemoryRateLimitStore {
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

fn drop_stale(timestamps: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    timestamps.retain(|at| *at > cutoff);
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn count_since(&self, key: &RateLimitKey, cutoff: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        match windows.get_mut(key) {
            Some(timestamps) => {
                drop_stale(timestamps, cutoff);
                timestamps.len()
            }
            None => 0,
        }
    }

    fn append(&self, key: &RateLimitKey, at: DateTime<Utc>) {
        self.windows
            .lock()
            .entry(key.clone())
            .or_default()
            .push_back(at);
    }

    fn try_append(&self, key: &RateLimitKey, cutoff: DateTime<Utc>, limit: usize, at: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(key.clone()).or_default();
        drop_stale(timestamps, cutoff);
        if timestamps.len() >= limit {
            return false;
        }
        timestamps.push_back(at);
        true
    }

    fn remove(&self, key: &RateLimitKey, at: DateTime<Utc>) {
        let mut windows = self.windows.lock();
        let Some(timestamps) = windows.get_mut(key) else {
            return;
        };
        if let Some(position) = timestamps.iter().position(|recorded| *recorded == at) {
            timestamps.remove(position);
        }
        if timestamps.is_empty() {
            windows.remove(key);
        }
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            drop_stale(timestamps, cutoff);
            !timestamps.is_empty()
        });
        before - windows.len()
    }
}

/// A slot taken from a client's window. Dropping it without [`RateLimitPermit::commit`]
/// gives the slot back.
#[must_use = "an uncommitted permit releases its slot when dropped"]
pub struct RateLimitPermit {
    store: Arc<dyn RateLimitStore>,
    key: RateLimitKey,
    at: DateTime<Utc>,
    committed: bool,
}

impl RateLimitPermit {
    /// Keeps the slot for the rest of the window.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RateLimitPermit {
    fn drop(&mut self) {
        if !self.committed {
            self.store.remove(&self.key, self.at);
            debug!(client = %self.key.client_id, "released rate limit slot");
        }
    }
}

impl std::fmt::Debug for RateLimitPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPermit")
            .field("key", &self.key)
            .field("at", &self.at)
            .field("committed", &self.committed)
            .finish()
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    window: TimeDelta,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_window(store, WINDOW)
    }

    pub fn with_window(store: Arc<dyn RateLimitStore>, window: TimeDelta) -> Self {
        Self { store, window }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::default()))
    }

    /// True while fewer than `limit` submissions were recorded within the window ending at `now`.
    pub fn allow_at(&self, form_id: &FormId, client_id: &str, limit: u32, now: DateTime<Utc>) -> bool {
        let key = RateLimitKey::new(form_id, client_id);
        let recent = self.store.count_since(&key, now - self.window);
        recent < limit as usize
    }

    pub fn reserve(&self, form_id: &FormId, client_id: &str, limit: u32) -> Option<RateLimitPermit> {
        self.reserve_at(form_id, client_id, limit, Utc::now())
    }

    /// Takes a slot when fewer than `limit` are held within the window ending at `now`.
    /// Concurrent callers for one key never exceed `limit` between them.
    pub fn reserve_at(
        &self,
        form_id: &FormId,
        client_id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Option<RateLimitPermit> {
        let key = RateLimitKey::new(form_id, client_id);
        self.store
            .try_append(&key, now - self.window, limit as usize, now)
            .then(|| RateLimitPermit {
                store: self.store.clone(),
                key,
                at: now,
                committed: false,
            })
    }

    pub fn record_at(&self, form_id: &FormId, client_id: &str, at: DateTime<Utc>) {
        self.store.append(&RateLimitKey::new(form_id, client_id), at);
    }

    pub fn compact(&self) -> usize {
        self.compact_at(Utc::now())
    }

    pub fn compact_at(&self, now: DateTime<Utc>) -> usize {
        self.store.purge_before(now - self.window)
    }

    /// Runs [`RateLimiter::compact`] on a fixed interval until the handle is aborted.
    pub fn spawn_compaction(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.compact();
                if removed > 0 {
                    debug!(removed, "compacted rate limit windows");
                }
            }
        })
    }
}
