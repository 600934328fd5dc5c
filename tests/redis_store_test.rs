use std::sync::Arc;
use std::time::Duration;

use aegis_geodns::dns::{HandlerConfig, RedisConfig, RedisStore, RequestHandler, Store};

fn test_redis_config(prefix: &str) -> RedisConfig {
    RedisConfig {
        url: "redis://127.0.0.1:6379".to_string(),
        prefix: prefix.to_string(),
        suffix: String::new(),
        timeout_ms: 1000,
    }
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_redis_store_namespacing() {
    let store = RedisStore::connect(&test_redis_config("aegis-test:ns:")).await.unwrap();
    store.set("w0.example.com:1.2.3.4", r#"{"status":3}"#).await.unwrap();

    let keys = store.keys().await.unwrap();
    assert!(keys.contains(&"w0.example.com:1.2.3.4".to_string()));
    assert_eq!(
        store.get("w0.example.com:1.2.3.4").await.unwrap(),
        Some(r#"{"status":3}"#.to_string())
    );

    store.del("w0.example.com:1.2.3.4").await.unwrap();
    assert!(store.get("w0.example.com:1.2.3.4").await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_redis_backed_resolution() {
    let store = Arc::new(RedisStore::connect(&test_redis_config("aegis-test:zones:")).await.unwrap());
    store.hset("redis-test.com.", "@", "{}").await.unwrap();
    store
        .hset("redis-test.com.", "www", r#"{"a":[{"ip":"10.9.8.7"}]}"#)
        .await
        .unwrap();

    let config = HandlerConfig {
        zone_refresh_secs: 600,
        ..Default::default()
    };
    let handler = RequestHandler::new(config, store.clone()).await.unwrap();
    let resolved = handler.get_record("www.redis-test.com.").await.unwrap();
    assert_eq!(resolved.record.a[0].ip.to_string(), "10.9.8.7");

    store.del("redis-test.com.").await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_redis_timeout_on_unreachable_server() {
    let config = RedisConfig {
        url: "redis://10.255.255.1:6379".to_string(),
        timeout_ms: 100,
        ..Default::default()
    };
    let started = std::time::Instant::now();
    assert!(RedisStore::connect(&config).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}
