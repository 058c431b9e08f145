//! Shared counter store abstraction
//!
//! All mutable admission and cache state lives behind [`CounterStore`]. Every
//! operation must be atomic for a single key; none of the callers in this
//! crate need multi-key transactions.

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

mod memory;

pub use memory::{MemoryStore, MemoryStoreBuilder};


/// Remaining lifetime of a key as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (or has already expired)
    Missing,
    /// The key exists without an expiry
    Persistent,
    /// The key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Remaining time as an option, `None` for keys that never expire
    ///
    /// A missing key reports zero: the value the caller holds is already gone
    /// from the store.
    pub fn remaining(self) -> Option<Duration> {
        match self {
            KeyTtl::Missing => Some(Duration::ZERO),
            KeyTtl::Persistent => None,
            KeyTtl::Expires(ttl) => Some(ttl),
        }
    }
}

/// Key/value store with atomic counters and per-key expiry (Redis model)
///
/// Counters are stored as decimal text. A missing key counts as zero for
/// [`incr`](CounterStore::incr) and [`decr_by`](CounterStore::decr_by), and
/// both preserve whatever expiry the key already carries.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one and return the new value
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomically subtract `amount` and return the new value
    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Write a value, replacing any previous expiry with `ttl` (or none)
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>)
    -> Result<(), StoreError>;

    /// Set an expiry on an existing key; returns false if the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Remove a key; returns true if something was deleted
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Read a counter, treating a missing key as absent
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get(key).await? {
            Some(raw) => parse_counter(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Read a value together with its remaining lifetime
    ///
    /// The value and the TTL are two round trips; if the key expires in
    /// between, the value is still returned with a zero TTL.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Bytes, KeyTtl)>, StoreError> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        let ttl = self.ttl(key).await?;
        Ok(Some((value, ttl)))
    }
}

pub(crate) fn parse_counter(key: &str, raw: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| StoreError::NotAnInteger {
            key: key.to_string(),
        })
}
