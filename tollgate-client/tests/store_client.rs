mod common;

use bytes::Bytes;
use common::MockRedis;
use std::sync::Arc;
use std::time::Duration;
use tollgate::{
    AdmissionConfig, AdmissionController, AuditEvent, CacheConfig, CacheKey, CounterStore,
    Decision, DenyReason, DurableQueue, EmitterConfig, EventCategory, EventEmitter, KeyTtl,
    ReadThroughCache, StoreError,
};
use tollgate_client::{ClientError, StoreClient};

#[tokio::test]
async fn test_counter_commands() {
    let redis = MockRedis::start().await;
    let client = StoreClient::connect(redis.addr).await.unwrap();

    assert_eq!(client.incr("hits").await.unwrap(), 1);
    assert_eq!(client.incr("hits").await.unwrap(), 2);
    assert_eq!(client.decr_by("hits", 5).await.unwrap(), -3);
    assert_eq!(client.get("hits").await.unwrap(), Some(Bytes::from("-3")));
    assert_eq!(client.get("absent").await.unwrap(), None);

    assert_eq!(client.pttl("hits").await.unwrap(), KeyTtl::Persistent);
    assert!(client.pexpire("hits", Duration::from_secs(20)).await.unwrap());
    match client.pttl("hits").await.unwrap() {
        KeyTtl::Expires(left) => assert!(left <= Duration::from_secs(20) && left > Duration::ZERO),
        other => panic!("expected an expiry, got {other:?}"),
    }
    assert!(!client.pexpire("absent", Duration::from_secs(1)).await.unwrap());
    assert_eq!(client.pttl("absent").await.unwrap(), KeyTtl::Missing);

    assert_eq!(client.del("hits").await.unwrap(), 1);
    assert_eq!(client.del("hits").await.unwrap(), 0);
}

#[tokio::test]
async fn test_set_with_expiry_and_binary_value() {
    let redis = MockRedis::start().await;
    let client = StoreClient::connect(redis.addr).await.unwrap();
    let payload = b"\x00binary\r\npayload\xff";

    client
        .set("blob", payload, Some(Duration::from_secs(3600)))
        .await
        .unwrap();

    let (value, ttl) = CounterStore::get_with_ttl(&client, "blob")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&value[..], &payload[..]);
    assert!(matches!(ttl, KeyTtl::Expires(left) if left <= Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_non_integer_counter() {
    let redis = MockRedis::start().await;
    let client = StoreClient::connect(redis.addr).await.unwrap();
    client.set("name", b"asha", None).await.unwrap();

    assert!(matches!(
        client.incr("name").await,
        Err(ClientError::Server(_))
    ));
    match CounterStore::incr(&client, "name").await {
        Err(StoreError::NotAnInteger { key }) => assert_eq!(key, "name"),
        other => panic!("expected NotAnInteger, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = StoreClient::builder()
        .connect_timeout(Duration::from_millis(200))
        .build(addr)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unreachable_store_maps_to_connection_error() {
    let redis = MockRedis::start().await;
    let client = StoreClient::connect(redis.addr).await.unwrap();

    // Point a second client at a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    let result = StoreClient::connect(dead).await;
    let error: StoreError = match result {
        Err(e) => e.into(),
        Ok(_) => panic!("nothing listens on {dead}"),
    };
    assert!(matches!(error, StoreError::Connection(_)));

    // The healthy client is unaffected
    assert_eq!(client.incr("still-alive").await.unwrap(), 1);
}

#[tokio::test]
async fn test_connections_are_pooled() {
    let redis = MockRedis::start().await;
    let client = StoreClient::connect(redis.addr).await.unwrap();

    for _ in 0..10 {
        client.incr("pooled").await.unwrap();
    }
    assert_eq!(client.pool_stats().idle_connections, 1);

    let clones: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.incr("pooled").await.unwrap() })
        })
        .collect();
    futures::future::join_all(clones).await;

    assert_eq!(client.get("pooled").await.unwrap(), Some(Bytes::from("18")));
}

#[tokio::test]
async fn test_admission_over_shared_store() {
    let redis = MockRedis::start().await;
    let config = AdmissionConfig {
        window_limit: 3,
        bucket_capacity: 100,
        key_prefix: "hip:".to_string(),
        ..AdmissionConfig::default()
    };

    // Two controllers, as two server instances would be
    let first = AdmissionController::new(
        Arc::new(StoreClient::connect(redis.addr).await.unwrap()),
        config.clone(),
    )
    .unwrap();
    let second = AdmissionController::new(
        Arc::new(StoreClient::connect(redis.addr).await.unwrap()),
        config,
    )
    .unwrap();

    assert!(first.admit("ID-1").await.unwrap().is_allowed());
    assert!(second.admit("ID-1").await.unwrap().is_allowed());
    assert!(first.admit("ID-1").await.unwrap().is_allowed());
    assert_eq!(
        second.admit("ID-1").await.unwrap(),
        Decision::Denied(vec![DenyReason::WindowExceeded])
    );

    match redis.store.ttl("hip:rate_limit:ID-1").await.unwrap() {
        KeyTtl::Expires(left) => assert!(left > Duration::from_secs(20)),
        other => panic!("expected the cooldown expiry, got {other:?}"),
    }
    assert_eq!(
        redis.store.get_int("hip:total_count:ID-1").await.unwrap(),
        Some(4)
    );
}

#[tokio::test]
async fn test_cache_over_shared_store() {
    let redis = MockRedis::start().await;
    let client = Arc::new(StoreClient::connect(redis.addr).await.unwrap());
    let cache = ReadThroughCache::new(
        client,
        CacheConfig {
            key_prefix: "hip:".to_string(),
            ..CacheConfig::default()
        },
    )
    .unwrap();
    let key = CacheKey::new("pref", "ID-1");

    cache.populate(&key, &vec!["dark-mode", "sms"]).await.unwrap();
    let entry = cache.get_cached::<Vec<String>>(&key).await.unwrap().unwrap();

    assert_eq!(entry.value, vec!["dark-mode".to_string(), "sms".to_string()]);
    let ttl = entry.ttl.unwrap();
    assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(3600));
    assert!(redis.store.get("hip:cache:pref:ID-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_queue_publish_appends_to_list() {
    let redis = MockRedis::start().await;
    let client = Arc::new(StoreClient::connect(redis.addr).await.unwrap());

    client
        .publish("patient_records", Bytes::from_static(b"{\"id\":1}"))
        .await
        .unwrap();

    let emitter = EventEmitter::new(client, EmitterConfig::default()).unwrap();
    emitter
        .emit(&AuditEvent::new(EventCategory::AccountLogin, "HIP-7").name("Asha"))
        .await
        .unwrap();

    assert_eq!(redis.list("patient_records"), vec![Bytes::from_static(b"{\"id\":1}")]);
    let logs = redis.list("logs");
    assert_eq!(logs.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&logs[0]).unwrap();
    assert_eq!(body["category"], "hip_accountLogin");
    assert_eq!(body["hip_name"], "Asha");
}
