//! Behavioural tests for ResponseCache: TTL, size bound, corruption and
//! storage failures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use waypoint_cache::{CacheKey, ManualClock, MemoryStorage, ResponseCache};

use common::{FailingStorage, GatedStorage};

const NO_QUERY: [(&str, &str); 0] = [];

fn cache_with(
    storage: MemoryStorage,
    clock: ManualClock,
    ttl: Duration,
    max_entries: usize,
) -> ResponseCache<MemoryStorage> {
    ResponseCache::builder()
        .storage(storage)
        .ttl(ttl)
        .max_entries(max_entries)
        .clock(clock)
        .build()
}

#[tokio::test]
async fn test_put_then_get_until_ttl_elapses() {
    let clock = ManualClock::starting_now();
    let storage = MemoryStorage::new();
    let cache = cache_with(
        storage.clone(),
        clock.clone(),
        Duration::from_secs(5 * 60),
        100,
    );

    cache.put("/posts", &NO_QUERY, &json!({"id": 1})).await;

    let hit: Option<Value> = cache.get("/posts", &NO_QUERY).await;
    assert_eq!(hit, Some(json!({"id": 1})));

    clock.advance(Duration::from_secs(6 * 60));

    let miss: Option<Value> = cache.get("/posts", &NO_QUERY).await;
    assert_eq!(miss, None);
    assert!(
        !storage.contains(CacheKey::from_path("/posts").as_str()),
        "expired entry should be removed from storage"
    );
}

#[tokio::test]
async fn test_entry_at_exact_ttl_is_still_a_hit() {
    let clock = ManualClock::starting_now();
    let cache = cache_with(
        MemoryStorage::new(),
        clock.clone(),
        Duration::from_secs(60),
        10,
    );

    cache.put("/posts", &NO_QUERY, &"v").await;
    clock.advance(Duration::from_secs(60));

    let hit: Option<String> = cache.get("/posts", &NO_QUERY).await;
    assert_eq!(hit.as_deref(), Some("v"));
}

#[tokio::test]
async fn test_bound_keeps_most_recent_entries() {
    let clock = ManualClock::starting_now();
    let storage = MemoryStorage::new();
    let max_entries = 5;
    let extra = 3;
    let cache = cache_with(
        storage.clone(),
        clock.clone(),
        Duration::from_secs(3600),
        max_entries,
    );

    for id in 0..(max_entries + extra) {
        cache
            .put("/items", &[("id", id.to_string())], &json!({ "id": id }))
            .await;
        clock.advance(Duration::from_millis(10));
    }

    assert_eq!(storage.len(), max_entries);

    for id in 0..extra {
        let evicted: Option<Value> = cache.get("/items", &[("id", id.to_string())]).await;
        assert_eq!(evicted, None, "entry {id} should have been evicted");
    }
    for id in extra..(max_entries + extra) {
        let kept: Option<Value> = cache.get("/items", &[("id", id.to_string())]).await;
        assert_eq!(kept, Some(json!({ "id": id })), "entry {id} should be kept");
    }

    assert_eq!(cache.stats().await.evictions, extra as u64);
}

#[tokio::test]
async fn test_reads_do_not_refresh_eviction_order() {
    let clock = ManualClock::starting_now();
    let cache = cache_with(
        MemoryStorage::new(),
        clock.clone(),
        Duration::from_secs(3600),
        2,
    );

    cache.put("/a", &NO_QUERY, &"a").await;
    clock.advance(Duration::from_millis(10));
    cache.put("/b", &NO_QUERY, &"b").await;
    clock.advance(Duration::from_millis(10));

    // touching /a must not protect it
    let _: Option<String> = cache.get("/a", &NO_QUERY).await;
    cache.put("/c", &NO_QUERY, &"c").await;

    let a: Option<String> = cache.get("/a", &NO_QUERY).await;
    let b: Option<String> = cache.get("/b", &NO_QUERY).await;
    let c: Option<String> = cache.get("/c", &NO_QUERY).await;
    assert_eq!(a, None);
    assert_eq!(b.as_deref(), Some("b"));
    assert_eq!(c.as_deref(), Some("c"));
}

#[tokio::test]
async fn test_repeated_reads_are_identical_and_do_not_restamp() {
    let clock = ManualClock::starting_now();
    let storage = MemoryStorage::new();
    let cache = cache_with(storage.clone(), clock.clone(), Duration::from_secs(60), 10);
    let key = CacheKey::from_path("/profile");

    cache.put("/profile", &NO_QUERY, &json!({"name": "ada"})).await;
    let raw_before = storage_bytes(&storage, &key).await;

    for _ in 0..5 {
        clock.advance(Duration::from_secs(5));
        let hit: Option<Value> = cache.get("/profile", &NO_QUERY).await;
        assert_eq!(hit, Some(json!({"name": "ada"})));
    }

    assert_eq!(storage_bytes(&storage, &key).await, raw_before);
}

#[tokio::test]
async fn test_upsert_replaces_payload_and_timestamp() {
    let clock = ManualClock::starting_now();
    let cache = cache_with(
        MemoryStorage::new(),
        clock.clone(),
        Duration::from_secs(60),
        10,
    );

    cache.put("/posts", &NO_QUERY, &1).await;
    clock.advance(Duration::from_secs(50));
    cache.put("/posts", &NO_QUERY, &2).await;
    clock.advance(Duration::from_secs(50));

    let hit: Option<i32> = cache.get("/posts", &NO_QUERY).await;
    assert_eq!(hit, Some(2));
}

#[tokio::test]
async fn test_query_order_does_not_matter() {
    let cache = ResponseCache::builder().build();

    cache
        .put("/search", &[("q", "rust"), ("page", "2")], &"results")
        .await;

    let hit: Option<String> = cache.get("/search", &[("page", "2"), ("q", "rust")]).await;
    assert_eq!(hit.as_deref(), Some("results"));
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss_and_removed() {
    let storage = MemoryStorage::new();
    let key = CacheKey::from_path("/broken");
    storage.insert_raw(key.as_str(), "{not valid json");

    let cache = ResponseCache::builder()
        .storage(storage.clone())
        .sweep_on_init(false)
        .build();

    let miss: Option<Value> = cache.get("/broken", &NO_QUERY).await;
    assert_eq!(miss, None);
    assert!(!storage.contains(key.as_str()));
}

#[tokio::test]
async fn test_corrupt_entries_are_dropped_during_eviction() {
    let clock = ManualClock::starting_now();
    let storage = MemoryStorage::new();
    storage.insert_raw("junk-1", "garbage");
    storage.insert_raw("junk-2", "more garbage");

    let cache = ResponseCache::builder()
        .storage(storage.clone())
        .max_entries(2)
        .sweep_on_init(false)
        .clock(clock.clone())
        .build();

    cache.put("/a", &NO_QUERY, &"a").await;
    clock.advance(Duration::from_millis(1));
    cache.put("/b", &NO_QUERY, &"b").await;

    assert_eq!(storage.len(), 2);
    assert!(!storage.contains("junk-1"));
    assert!(!storage.contains("junk-2"));
}

#[tokio::test]
async fn test_expired_read_does_not_remove_concurrent_write() {
    let clock = ManualClock::starting_now();
    let storage = GatedStorage::default();
    let cache = Arc::new(
        ResponseCache::builder()
            .storage(storage.clone())
            .ttl(Duration::from_secs(60))
            .max_entries(10)
            .sweep_on_init(false)
            .clock(clock.clone())
            .build(),
    );

    cache.put("/feed", &NO_QUERY, &"stale").await;
    clock.advance(Duration::from_secs(120));

    storage.hold_next_get();
    let reader = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get::<String, _, _>("/feed", &NO_QUERY).await }
    });
    storage.held().await;

    cache.put("/feed", &NO_QUERY, &"fresh").await;
    storage.release();

    assert_eq!(reader.await.unwrap(), None);
    let hit: Option<String> = cache.get("/feed", &NO_QUERY).await;
    assert_eq!(hit.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let cache = ResponseCache::builder().build();
    cache.put("/a", &NO_QUERY, &"a").await;
    cache.put("/b", &NO_QUERY, &"b").await;

    cache.clear().await;

    assert_eq!(cache.stats().await.entries, Some(0));
    let miss: Option<String> = cache.get("/a", &NO_QUERY).await;
    assert_eq!(miss, None);
}

#[tokio::test]
async fn test_storage_failures_degrade_to_miss() {
    let cache = ResponseCache::builder()
        .storage(FailingStorage::failing_reads())
        .build();

    cache.put("/posts", &NO_QUERY, &"v").await;
    let miss: Option<String> = cache.get("/posts", &NO_QUERY).await;
    assert_eq!(miss, None);

    let stats = cache.stats().await;
    assert!(stats.errors > 0);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn test_open_failure_is_retried_on_next_use() {
    let storage = FailingStorage::failing_open_once();
    let cache = ResponseCache::builder().storage(storage).build();

    assert!(!cache.initialize().await);
    assert!(!cache.is_initialized());

    cache.put("/posts", &NO_QUERY, &"v").await;
    assert!(cache.is_initialized());
    let hit: Option<String> = cache.get("/posts", &NO_QUERY).await;
    assert_eq!(hit.as_deref(), Some("v"));
}

async fn storage_bytes(storage: &MemoryStorage, key: &CacheKey) -> bytes::Bytes {
    use waypoint_cache::Storage;
    storage
        .get(key.as_str())
        .await
        .unwrap()
        .expect("entry should be stored")
}
