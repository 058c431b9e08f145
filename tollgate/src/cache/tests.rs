use super::*;
use crate::clock::ManualClock;
use crate::error::StoreError;
use crate::store::{KeyTtl, MemoryStore};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Preferences {
    language: String,
    notifications: bool,
}

fn prefs(language: &str) -> Preferences {
    Preferences {
        language: language.to_string(),
        notifications: true,
    }
}

/// Serves whatever value it currently holds and counts fetches
struct RecordingSource {
    current: Mutex<Preferences>,
    fetches: AtomicUsize,
}

impl RecordingSource {
    fn new(value: Preferences) -> Self {
        Self {
            current: Mutex::new(value),
            fetches: AtomicUsize::new(0),
        }
    }

    fn update(&self, value: Preferences) {
        *self.current.lock() = value;
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthoritativeSource<Preferences> for RecordingSource {
    async fn fetch(&self, _kind: &str, _identity: &str) -> std::result::Result<Preferences, BoxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.current.lock().clone())
    }
}

struct BrokenSource;

#[async_trait]
impl AuthoritativeSource<Preferences> for BrokenSource {
    async fn fetch(&self, _kind: &str, identity: &str) -> std::result::Result<Preferences, BoxError> {
        Err(format!("no preferences row for {identity}").into())
    }
}

struct SlowSource;

#[async_trait]
impl AuthoritativeSource<Preferences> for SlowSource {
    async fn fetch(&self, _kind: &str, _identity: &str) -> std::result::Result<Preferences, BoxError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(prefs("en"))
    }
}

/// A store whose reads fail while writes succeed
struct ReadFailingStore(MemoryStore);

#[async_trait]
impl CounterStore for ReadFailingStore {
    async fn incr(&self, key: &str) -> std::result::Result<i64, StoreError> {
        self.0.incr(key).await
    }
    async fn decr_by(&self, key: &str, amount: i64) -> std::result::Result<i64, StoreError> {
        self.0.decr_by(key, amount).await
    }
    async fn get(&self, _key: &str) -> std::result::Result<Option<Bytes>, StoreError> {
        Err(StoreError::Connection("broken pipe".into()))
    }
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), StoreError> {
        self.0.set(key, value, ttl).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> std::result::Result<bool, StoreError> {
        self.0.expire(key, ttl).await
    }
    async fn ttl(&self, key: &str) -> std::result::Result<KeyTtl, StoreError> {
        self.0.ttl(key).await
    }
    async fn del(&self, key: &str) -> std::result::Result<bool, StoreError> {
        self.0.del(key).await
    }
}

fn cache_with_clock() -> (ReadThroughCache, Arc<MemoryStore>, ManualClock) {
    let clock = ManualClock::new();
    let store = Arc::new(
        MemoryStore::builder()
            .clock(Arc::new(clock.clone()))
            .build(),
    );
    let cache = ReadThroughCache::new(store.clone(), CacheConfig::default()).unwrap();
    (cache, store, clock)
}

#[test]
fn test_cache_key_format() {
    let key = CacheKey::new("pref", "ID-1");
    assert_eq!(key.as_str(), "pref:ID-1");
    assert_eq!(key.to_string(), "pref:ID-1");
    assert_ne!(CacheKey::new("pref", "ID-1"), CacheKey::new("details", "ID-1"));
}

#[test]
fn test_cache_key_separator_in_kind_is_escaped() {
    let split_kind = CacheKey::new("a:b", "c");
    let split_identity = CacheKey::new("a", "b:c");

    assert_eq!(split_kind.as_str(), "a%3Ab:c");
    assert_eq!(split_identity.as_str(), "a:b:c");
    assert_ne!(split_kind, split_identity);
    assert_ne!(CacheKey::new("a%3Ab", "c"), split_kind);
}

#[tokio::test]
async fn test_cache_writes_cannot_touch_admission_counters() {
    use crate::admission::{AdmissionConfig, AdmissionController, DenyReason};

    let store = Arc::new(MemoryStore::new());
    let admission = AdmissionController::new(
        store.clone(),
        AdmissionConfig {
            session_quota: 2,
            key_prefix: "hip:".to_string(),
            ..AdmissionConfig::default()
        },
    )
    .unwrap();
    let cache = ReadThroughCache::new(
        store.clone(),
        CacheConfig {
            key_prefix: "hip:".to_string(),
            ..CacheConfig::default()
        },
    )
    .unwrap();

    for _ in 0..3 {
        admission.admit("ID-1").await.unwrap();
    }

    cache
        .populate(&CacheKey::new("total_count", "ID-1"), &0)
        .await
        .unwrap();
    cache
        .populate(&CacheKey::new("rate_limit", "ID-1"), &"garbage")
        .await
        .unwrap();

    // The quota is still used up and the counters still parse
    let decision = admission.admit("ID-1").await.unwrap();
    assert_eq!(decision.reasons(), &[DenyReason::SessionQuotaExhausted]);
    assert_eq!(store.get_int("hip:total_count:ID-1").await.unwrap(), Some(4));
    assert_eq!(store.get_int("hip:rate_limit:ID-1").await.unwrap(), Some(4));

    // Cache reads see only cache entries
    let entry = cache
        .get_cached::<i64>(&CacheKey::new("total_count", "ID-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.value, 0);
    assert!(cache
        .get_cached::<i64>(&CacheKey::new("leaky_bucket", "ID-1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_populate_then_get_cached() {
    let (cache, _, _) = cache_with_clock();
    let key = CacheKey::new("pref", "ID-1");

    cache.populate(&key, &prefs("en")).await.unwrap();
    let entry: CacheEntry<Preferences> = cache.get_cached(&key).await.unwrap().unwrap();

    assert_eq!(entry.value, prefs("en"));
    let ttl = entry.ttl.unwrap();
    assert!(ttl > Duration::ZERO);
    assert!(ttl <= Duration::from_secs(3600));
}

#[tokio::test]
async fn test_get_cached_miss() {
    let (cache, _, _) = cache_with_clock();
    let entry: Option<CacheEntry<Preferences>> =
        cache.get_cached(&CacheKey::new("pref", "nobody")).await.unwrap();
    assert!(entry.is_none());
}

#[tokio::test]
async fn test_miss_fetches_once_then_hits() {
    let (cache, _, clock) = cache_with_clock();
    let source = RecordingSource::new(prefs("en"));

    let first = cache.read("pref", "ID-1", &source).await.unwrap();
    assert_eq!(first, CacheRead::Populated { value: prefs("en") });
    assert_eq!(source.fetches(), 1);

    clock.advance(Duration::from_secs(600));
    let second = cache.read("pref", "ID-1", &source).await.unwrap();
    assert_eq!(
        second,
        CacheRead::Hit {
            value: prefs("en"),
            ttl: Some(Duration::from_secs(3000)),
        }
    );
    assert_eq!(second.refresh_in(), Some(Duration::from_secs(3000)));
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let (cache, _, clock) = cache_with_clock();
    let source = RecordingSource::new(prefs("en"));

    cache.read("pref", "ID-1", &source).await.unwrap();
    clock.advance(Duration::from_secs(3600));

    let read = cache.read("pref", "ID-1", &source).await.unwrap();
    assert!(!read.is_hit());
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_writes_do_not_invalidate() {
    let (cache, _, _) = cache_with_clock();
    let source = RecordingSource::new(prefs("en"));

    cache.read("pref", "ID-1", &source).await.unwrap();
    source.update(prefs("fr"));

    let read = cache.read("pref", "ID-1", &source).await.unwrap();
    assert_eq!(read.into_value(), prefs("en"));
}

#[tokio::test]
async fn test_refresh_bypasses_cache() {
    let (cache, _, _) = cache_with_clock();
    let source = RecordingSource::new(prefs("en"));

    cache.read("pref", "ID-1", &source).await.unwrap();
    source.update(prefs("fr"));

    let refreshed = cache.refresh("pref", "ID-1", &source).await.unwrap();
    assert_eq!(refreshed, CacheRead::Populated { value: prefs("fr") });

    // The refreshed value replaced the stale entry
    let read = cache.read("pref", "ID-1", &source).await.unwrap();
    assert!(read.is_hit());
    assert_eq!(read.value(), &prefs("fr"));
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_malformed_entry_is_an_error() {
    let (cache, store, _) = cache_with_clock();
    store
        .set("cache:pref:ID-1", Bytes::from_static(b"{not json"), None)
        .await
        .unwrap();
    let source = RecordingSource::new(prefs("en"));

    let result = cache.read("pref", "ID-1", &source).await;
    match result {
        Err(Error::MalformedPayload { key, .. }) => assert_eq!(key, "cache:pref:ID-1"),
        other => panic!("expected malformed payload, got {other:?}"),
    }
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_persistent_entry_has_no_ttl() {
    let (cache, store, _) = cache_with_clock();
    let raw = serde_json::to_vec(&prefs("en")).unwrap();
    store.set("cache:pref:ID-1", Bytes::from(raw), None).await.unwrap();

    let entry: CacheEntry<Preferences> = cache
        .get_cached(&CacheKey::new("pref", "ID-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.ttl, None);
}

#[tokio::test]
async fn test_store_failure_is_not_a_miss() {
    let cache =
        ReadThroughCache::new(Arc::new(ReadFailingStore(MemoryStore::new())), CacheConfig::default())
            .unwrap();
    let source = RecordingSource::new(prefs("en"));

    let result = cache.read("pref", "ID-1", &source).await;
    assert!(matches!(result, Err(Error::Store(StoreError::Connection(_)))));
    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn test_source_failure_populates_nothing() {
    let (cache, store, _) = cache_with_clock();

    let result = cache.read("pref", "ID-1", &BrokenSource).await;
    assert!(matches!(result, Err(Error::Source { .. })));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_source_fetch_is_bounded() {
    let cache = ReadThroughCache::new(
        Arc::new(MemoryStore::new()),
        CacheConfig {
            source_timeout: Duration::from_secs(2),
            ..CacheConfig::default()
        },
    )
    .unwrap();

    let result = cache.read("pref", "ID-1", &SlowSource).await;
    assert!(matches!(
        result,
        Err(Error::Timeout {
            operation: "source fetch",
            ..
        })
    ));
}

#[tokio::test]
async fn test_key_prefix_applies_to_store_keys() {
    let store = Arc::new(MemoryStore::new());
    let cache = ReadThroughCache::new(
        store.clone(),
        CacheConfig {
            key_prefix: "hip:".to_string(),
            ..CacheConfig::default()
        },
    )
    .unwrap();

    cache.read("details", "ID-1", &RecordingSource::new(prefs("en"))).await.unwrap();
    assert!(store.get("hip:cache:details:ID-1").await.unwrap().is_some());
    assert!(store.get("cache:details:ID-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_misses_are_bounded_by_readers() {
    let (cache, _, _) = cache_with_clock();
    let cache = Arc::new(cache);
    let source = Arc::new(RecordingSource::new(prefs("en")));
    let readers = 8;

    let tasks: Vec<_> = (0..readers)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let source = Arc::clone(&source);
            tokio::spawn(async move {
                cache
                    .read("pref", "ID-1", source.as_ref())
                    .await
                    .unwrap()
                    .into_value()
            })
        })
        .collect();

    for value in futures::future::join_all(tasks).await {
        assert_eq!(value.unwrap(), prefs("en"));
    }

    let fetches = source.fetches();
    assert!(fetches >= 1 && fetches <= readers);

    // Once populated, nobody goes back to the source
    cache.read("pref", "ID-1", source.as_ref()).await.unwrap();
    assert_eq!(source.fetches(), fetches);
}

#[test]
fn test_config_validation() {
    assert!(CacheConfig::default().validate().is_ok());
    let zero_ttl = CacheConfig {
        entry_ttl: Duration::ZERO,
        ..CacheConfig::default()
    };
    assert!(matches!(zero_ttl.validate(), Err(Error::InvalidConfig(_))));
}
