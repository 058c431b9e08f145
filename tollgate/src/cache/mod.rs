//! Read-through (cache-aside) cache over the shared counter store
//!
//! Entries are JSON documents written with a fixed absolute expiry. A read
//! either hits and reports the remaining lifetime, or misses, fetches from the
//! [`AuthoritativeSource`] and writes the value back before returning it.
//!
//! Writes to the authoritative source do not invalidate entries: a reader may
//! see data up to `entry_ttl` old. Store failures and undecodable entries are
//! errors, never misses.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tollgate::{AuthoritativeSource, BoxError, CacheConfig, CacheRead, MemoryStore, ReadThroughCache};
//!
//! struct Preferences;
//!
//! #[async_trait]
//! impl AuthoritativeSource<Vec<String>> for Preferences {
//!     async fn fetch(&self, _kind: &str, identity: &str) -> Result<Vec<String>, BoxError> {
//!         Ok(vec![format!("{identity}:dark-mode")])
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tollgate::Result<()> {
//! let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
//!
//! let first = cache.read("pref", "ID-1", &Preferences).await?;
//! assert!(matches!(first, CacheRead::Populated { .. }));
//!
//! let second = cache.read("pref", "ID-1", &Preferences).await?;
//! assert!(second.is_hit());
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
mod tests;

use crate::deadline::bounded;
use crate::error::{BoxError, Error, Result};
use crate::store::CounterStore;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Segment that keeps cache entries apart from admission counters
const CACHE_NAMESPACE: &str = "cache:";

/// Deterministic cache key for one resource kind of one identity
///
/// `:` and `%` in the kind are percent-encoded, so the kind always ends at the
/// first separator and no two `(kind, identity)` pairs share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(kind: &str, identity: &str) -> Self {
        let kind = kind.replace('%', "%25").replace(':', "%3A");
        CacheKey(format!("{kind}:{identity}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Absolute expiry applied when an entry is written
    pub entry_ttl: Duration,
    /// Bound on each counter store round trip
    pub store_timeout: Duration,
    /// Bound on each authoritative source fetch
    pub source_timeout: Duration,
    /// Prepended to every key, e.g. `"hip:"`
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(3600),
            store_timeout: Duration::from_millis(500),
            source_timeout: Duration::from_secs(5),
            key_prefix: String::new(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.entry_ttl.is_zero() {
            return Err(Error::InvalidConfig("cache entry ttl must be non-zero".to_string()));
        }
        if self.store_timeout.is_zero() || self.source_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "cache store and source timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The system of record consulted on a cache miss
#[async_trait]
pub trait AuthoritativeSource<T>: Send + Sync {
    async fn fetch(&self, kind: &str, identity: &str) -> std::result::Result<T, BoxError>;
}

/// A decoded cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Remaining lifetime reported by the store; `None` if the entry never expires
    pub ttl: Option<Duration>,
}

/// How a read was served
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
    /// Served from the cache; `ttl` hints when the entry will vanish
    Hit { value: T, ttl: Option<Duration> },
    /// Fetched from the authoritative source and written back
    Populated { value: T },
}

impl<T> CacheRead<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheRead::Hit { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            CacheRead::Hit { value, .. } | CacheRead::Populated { value } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            CacheRead::Hit { value, .. } | CacheRead::Populated { value } => value,
        }
    }

    /// Seconds until a fresh fetch, if the value came from the cache
    pub fn refresh_in(&self) -> Option<Duration> {
        match self {
            CacheRead::Hit { ttl, .. } => *ttl,
            CacheRead::Populated { .. } => None,
        }
    }
}

pub struct ReadThroughCache {
    store: Arc<dyn CounterStore>,
    config: CacheConfig,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn CounterStore>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up an entry without falling back to the source
    ///
    /// `Ok(None)` is a definitive miss. A hit whose bytes do not decode as `T`
    /// is [`Error::MalformedPayload`].
    pub async fn get_cached<T>(&self, key: &CacheKey) -> Result<Option<CacheEntry<T>>>
    where
        T: DeserializeOwned,
    {
        let full_key = self.store_key(key);
        let found = bounded(
            "cache read",
            self.config.store_timeout,
            self.store.get_with_ttl(&full_key),
        )
        .await?;

        let Some((raw, ttl)) = found else {
            tracing::trace!(key = %full_key, "cache miss");
            return Ok(None);
        };

        let value = serde_json::from_slice(&raw).map_err(|source| Error::MalformedPayload {
            key: full_key.clone(),
            source,
        })?;

        tracing::trace!(key = %full_key, ?ttl, "cache hit");
        Ok(Some(CacheEntry {
            value,
            ttl: ttl.remaining(),
        }))
    }

    /// Write `value` under `key` with the configured absolute expiry
    pub async fn populate<T>(&self, key: &CacheKey, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value).map_err(Error::Serialize)?;
        let full_key = self.store_key(key);
        bounded(
            "cache populate",
            self.config.store_timeout,
            self.store
                .set(&full_key, Bytes::from(payload), Some(self.config.entry_ttl)),
        )
        .await?;
        tracing::debug!(key = %full_key, ttl = ?self.config.entry_ttl, "cache populated");
        Ok(())
    }

    /// Cache-aside read of `kind` for `identity`
    pub async fn read<T, S>(&self, kind: &str, identity: &str, source: &S) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        S: AuthoritativeSource<T> + ?Sized,
    {
        let key = CacheKey::new(kind, identity);
        if let Some(entry) = self.get_cached(&key).await? {
            return Ok(CacheRead::Hit {
                value: entry.value,
                ttl: entry.ttl,
            });
        }
        self.fetch_and_populate(&key, kind, identity, source).await
    }

    /// Skip the cache lookup, fetch fresh data and write it back
    pub async fn refresh<T, S>(&self, kind: &str, identity: &str, source: &S) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        S: AuthoritativeSource<T> + ?Sized,
    {
        let key = CacheKey::new(kind, identity);
        self.fetch_and_populate(&key, kind, identity, source).await
    }

    async fn fetch_and_populate<T, S>(
        &self,
        key: &CacheKey,
        kind: &str,
        identity: &str,
        source: &S,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + Send,
        S: AuthoritativeSource<T> + ?Sized,
    {
        let value = bounded(
            "source fetch",
            self.config.source_timeout,
            source.fetch(kind, identity),
        )
        .await?;
        self.populate(key, &value).await?;
        Ok(CacheRead::Populated { value })
    }

    fn store_key(&self, key: &CacheKey) -> String {
        format!("{}{CACHE_NAMESPACE}{}", self.config.key_prefix, key)
    }
}
