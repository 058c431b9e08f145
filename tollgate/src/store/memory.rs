use super::{CounterStore, KeyTtl, parse_counter};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

// Configuration constants
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

struct Entry {
    value: Bytes,
    expiry: Option<SystemTime>,
}

impl Entry {
    fn is_live(&self, now: SystemTime) -> bool {
        self.expiry.is_none_or(|exp| exp > now)
    }
}

struct Inner {
    data: HashMap<String, Entry>,
    next_cleanup: SystemTime,
}

/// Single-process counter store
///
/// Implements the same semantics as a shared Redis instance: atomic integer
/// counters, per-key expiry, expired keys invisible to readers. Expired
/// entries are swept at a fixed interval rather than on every operation.
///
/// Suitable for tests and single-instance deployments; state is not shared
/// between processes.
///
/// # Example
///
/// ```
/// use tollgate::{CounterStore, MemoryStore};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::builder()
///     .capacity(10_000)
///     .cleanup_interval(Duration::from_secs(30))
///     .build();
///
/// assert_eq!(store.incr("rate_limit:ID-1").await.unwrap(), 1);
/// assert_eq!(store.incr("rate_limit:ID-1").await.unwrap(), 2);
/// # }
/// ```
pub struct MemoryStore {
    inner: Mutex<Inner>,
    cleanup_interval: Duration,
    clock: Arc<dyn Clock>,
}

/// Builder for configuring a [`MemoryStore`]
pub struct MemoryStoreBuilder {
    capacity: usize,
    cleanup_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryStoreBuilder {
    /// Expected number of live keys
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Clock used to evaluate expiry
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> MemoryStore {
        let now = self.clock.now();
        MemoryStore {
            inner: Mutex::new(Inner {
                // Pre-allocate with overhead to avoid rehashing
                data: HashMap::with_capacity(
                    (self.capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize,
                ),
                next_cleanup: now + self.cleanup_interval,
            }),
            cleanup_interval: self.cleanup_interval,
            clock: self.clock,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            clock: Arc::new(SystemClock),
        }
    }

    /// Number of entries held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    fn maybe_clean_expired(&self, inner: &mut Inner, now: SystemTime) {
        if now >= inner.next_cleanup {
            inner.data.retain(|_, entry| entry.is_live(now));
            inner.next_cleanup = now + self.cleanup_interval;
        }
    }

    /// Apply `delta` to the counter at `key`, keeping its expiry
    fn add(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.maybe_clean_expired(&mut inner, now);

        let (current, expiry) = match inner.data.get(key) {
            Some(entry) if entry.is_live(now) => (parse_counter(key, &entry.value)?, entry.expiry),
            _ => (0, None),
        };

        let next = current.checked_add(delta).ok_or_else(|| {
            StoreError::Server("increment or decrement would overflow".to_string())
        })?;

        inner.data.insert(
            key.to_string(),
            Entry {
                value: Bytes::from(next.to_string()),
                expiry,
            },
        );
        Ok(next)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, 1)
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let delta = amount.checked_neg().ok_or_else(|| {
            StoreError::Server("decrement would overflow".to_string())
        })?;
        self.add(key, delta)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        Ok(inner
            .data
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.maybe_clean_expired(&mut inner, now);
        inner.data.insert(
            key.to_string(),
            Entry {
                value,
                expiry: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expiry = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        Ok(match inner.data.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expiry {
                Some(exp) => KeyTtl::Expires(exp.duration_since(now).unwrap_or(Duration::ZERO)),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        })
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        Ok(inner
            .data
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }
}
