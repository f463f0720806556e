//! End-to-end scenarios for the two-tier cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use strata_cache::{
    fetch_fn, Body, BoxError, Cache, CacheConfig, CacheError, CachePolicy, ConfigError,
    EntityId, FetchOptions, Fetcher, IdRefs, RequestRecord, Response,
};

fn config() -> CacheConfig {
    CacheConfig::new()
        .with_default_entity_policy(CachePolicy::new(100))
        .with_default_request_policy(CachePolicy::new(100))
}

fn response(body: Value) -> Response {
    serde_json::from_value(json!({ "body": body })).unwrap()
}

/// A fetcher that counts invocations and always returns the same response.
fn counting_fetcher(name: &str, result: Response) -> (impl Fetcher, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetcher = fetch_fn(name, move |_params| {
        let result = result.clone();
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Response, BoxError>(result)
        }
    });
    (fetcher, calls)
}

#[tokio::test]
async fn basic_hit_resolves_without_refetching() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 1, "name": "A"}})),
    );
    let options = FetchOptions::new();
    let params = json!({"id": 1});

    let first = cache.fetch(&fetcher, params.clone(), &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    cache.quiesce().await;

    let second = cache.fetch(&fetcher, params, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1, "hit must not refetch");
    assert_eq!(second, first);
    assert_eq!(second.headers, None);
}

#[tokio::test]
async fn eviction_of_referenced_entity_forces_refetch() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 1, "name": "A"}})),
    );
    let options = FetchOptions::new();
    let params = json!({"id": 1});

    cache.fetch(&fetcher, params.clone(), &options).await.unwrap();
    cache.quiesce().await;

    cache.delete_entities("user", &json!(1)).unwrap();

    cache.fetch(&fetcher, params, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn list_body_populates_entities_in_order() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "listUsers",
        response(json!({"user": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]})),
    );
    let options = FetchOptions::new();

    cache.fetch(&fetcher, Value::Null, &options).await.unwrap();
    cache.quiesce().await;

    let body = cache.peek_body("listUsers", &Value::Null).unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&body).unwrap(),
        json!({"user": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]})
    );

    // both entities landed in the entity store individually
    for id in [1, 2] {
        let hit = cache
            .fetch_by_id("user", &json!(id), &fetcher, Value::Null, &options)
            .await
            .unwrap();
        assert_eq!(hit.body.get("user").unwrap().iter().count(), 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_by_id_shortcut_skips_fetcher() {
    let cache = Cache::new(config());
    cache
        .reset_entity_type("user", Some(&json!({"id": 5, "name": "X"})))
        .unwrap();

    let (fetcher, calls) = counting_fetcher("getUser", response(json!({"user": {"id": 5}})));
    let hit = cache
        .fetch_by_id("user", &json!(5), &fetcher, json!({"id": 5}), &FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        serde_json::to_value(&hit.body).unwrap(),
        json!({"user": {"id": 5, "name": "X"}})
    );
    assert_eq!(hit.headers, None);
}

#[tokio::test]
async fn fetch_by_id_falls_back_to_fetch_on_miss() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 7, "name": "Y"}})),
    );

    let miss = cache
        .fetch_by_id("user", &json!(7), &fetcher, json!({"id": 7}), &FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(miss.body.contains_key("user"));

    // population makes the next fetch_by_id a shortcut hit
    cache.quiesce().await;
    cache
        .fetch_by_id("user", &json!(7), &fetcher, json!({"id": 7}), &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_rule_bypasses_valid_cache_entry() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 1, "name": "A"}})),
    );
    let params = json!({"id": 1, "fresh": true});

    cache
        .fetch(&fetcher, params.clone(), &FetchOptions::new())
        .await
        .unwrap();
    cache.quiesce().await;

    // entry is valid, but the rule rejects these params
    let bypassing = FetchOptions::new().with_rule(|p| p.get("fresh").is_none());
    cache.fetch(&fetcher, params.clone(), &bypassing).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // a passing rule reads from cache again
    let passing = FetchOptions::new().with_rule(|p| p.get("id").is_some());
    cache.fetch(&fetcher, params, &passing).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn format_and_unformat_round_trip() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 1, "name": "A"}})),
    );

    // mutual inverses: cache singles as one-element runs
    let options = FetchOptions::new()
        .with_format(|body: Body| {
            body.into_iter()
                .map(|(k, slot)| match slot {
                    strata_cache::BodySlot::Single(e) => {
                        (k, strata_cache::BodySlot::Many(vec![e]))
                    }
                    many => (k, many),
                })
                .collect()
        })
        .with_unformat(|body: Body| {
            body.into_iter()
                .map(|(k, slot)| match slot {
                    strata_cache::BodySlot::Many(mut es) if es.len() == 1 => {
                        (k, strata_cache::BodySlot::Single(es.remove(0)))
                    }
                    other => (k, other),
                })
                .collect()
        });

    let params = json!({"id": 1});
    let first = cache.fetch(&fetcher, params.clone(), &options).await.unwrap();
    cache.quiesce().await;

    let second = cache.fetch(&fetcher, params, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.body, first.body);
}

#[tokio::test]
async fn population_is_idempotent() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 1, "name": "A"}})),
    );
    let params = json!({"id": 1});

    // an always-failing rule forces the fetch path, so the same result
    // is populated twice
    let bypassing = FetchOptions::new().with_rule(|_| false);
    cache.fetch(&fetcher, params.clone(), &bypassing).await.unwrap();
    cache.fetch(&fetcher, params.clone(), &bypassing).await.unwrap();
    cache.quiesce().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let body = cache.peek_body("getUser", &params).unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&body).unwrap(),
        json!({"user": {"id": 1, "name": "A"}})
    );

    // observable state is that of a single population: the next plain
    // fetch is a hit
    cache.fetch(&fetcher, params, &FetchOptions::new()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_operation_key_is_rejected() {
    let cache = Cache::new(config());
    let anonymous = strata_cache::FnFetcher::unnamed(|_params: Value| async move {
        Ok::<Response, BoxError>(response(json!({})))
    });

    let err = cache
        .fetch(&anonymous, Value::Null, &FetchOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::Config(ConfigError::MissingOperationKey)
    ));
}

#[tokio::test]
async fn missing_request_policy_fails_before_fetching() {
    let cache = Cache::new(CacheConfig::new().with_default_entity_policy(CachePolicy::new(10)));
    let (fetcher, calls) = counting_fetcher("getUser", response(json!({"user": {"id": 1}})));

    let err = cache
        .fetch(&fetcher, Value::Null, &FetchOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::Config(ConfigError::MissingOperationPolicy { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "pre-flight check must not fetch");

    // an explicit per-call policy fixes it
    let options = FetchOptions::new().with_policy(CachePolicy::new(10));
    cache.fetch(&fetcher, Value::Null, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_entity_policy_surfaces_to_caller() {
    let cache = Cache::new(CacheConfig::new().with_default_request_policy(CachePolicy::new(10)));
    let (fetcher, _) = counting_fetcher("getUser", response(json!({"user": {"id": 1}})));

    let err = cache
        .fetch(&fetcher, Value::Null, &FetchOptions::new())
        .await
        .unwrap_err();
    match err {
        CacheError::Config(ConfigError::MissingEntityPolicy { entity_type }) => {
            assert_eq!(entity_type, "user");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn fetch_failure_propagates_and_writes_nothing() {
    let cache = Cache::new(config());
    let failing = fetch_fn("getUser", |_params| async move {
        Err::<Response, BoxError>("upstream unavailable".into())
    });
    let params = json!({"id": 1});

    let err = cache
        .fetch(&failing, params.clone(), &FetchOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_fetch());
    assert!(format!("{err}").contains("upstream unavailable"));

    cache.quiesce().await;
    assert_eq!(cache.peek_head("getUser", &params).unwrap(), None);
    assert_eq!(cache.peek_body("getUser", &params).unwrap(), None);
}

#[tokio::test]
async fn peek_head_keeps_empty_and_unrecorded_distinct() {
    let cache = Cache::new(config());
    let params = json!({"id": 1});

    assert_eq!(cache.peek_head("getUser", &params).unwrap(), None);

    let (bare, _) = counting_fetcher("getUser", response(json!({"user": {"id": 1}})));
    cache.fetch(&bare, params.clone(), &FetchOptions::new()).await.unwrap();
    cache.quiesce().await;
    assert_eq!(cache.peek_head("getUser", &params).unwrap(), Some(None));

    let with_headers = fetch_fn("getHeader", |_p| async move {
        Ok::<Response, BoxError>(
            response(json!({"user": {"id": 2}})).with_headers(json!({"etag": "abc"})),
        )
    });
    cache
        .fetch(&with_headers, params.clone(), &FetchOptions::new())
        .await
        .unwrap();
    cache.quiesce().await;
    assert_eq!(
        cache.peek_head("getHeader", &params).unwrap(),
        Some(Some(json!({"etag": "abc"})))
    );
}

#[tokio::test]
async fn invalidate_drops_body_but_keeps_head() {
    let cache = Cache::new(config());
    let with_headers = fetch_fn("getUser", |_p| async move {
        Ok::<Response, BoxError>(
            response(json!({"user": {"id": 1}})).with_headers(json!({"etag": "abc"})),
        )
    });
    let params = json!({"id": 1});

    cache
        .fetch(&with_headers, params.clone(), &FetchOptions::new())
        .await
        .unwrap();
    cache.quiesce().await;

    cache.invalidate("getUser", &params).unwrap();

    assert_eq!(cache.peek_body("getUser", &params).unwrap(), None);
    assert_eq!(
        cache.peek_head("getUser", &params).unwrap(),
        Some(Some(json!({"etag": "abc"})))
    );
}

#[tokio::test]
async fn pin_request_overwrites_references_in_place() {
    let cache = Cache::new(config());
    let (fetcher, _) = counting_fetcher(
        "listUsers",
        response(json!({"user": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]})),
    );
    let params = Value::Null;

    cache.fetch(&fetcher, params.clone(), &FetchOptions::new()).await.unwrap();
    cache.quiesce().await;

    let mut record = RequestRecord::new();
    record.insert(
        "user".to_string(),
        IdRefs::Many(vec![EntityId::from_value(&json!(2))]),
    );
    cache.pin_request("listUsers", &params, record).unwrap();

    let body = cache.peek_body("listUsers", &params).unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&body).unwrap(),
        json!({"user": [{"id": 2, "name": "B"}]})
    );
}

#[tokio::test]
async fn reset_operation_and_entities() {
    let cache = Cache::new(config());
    let (fetcher, calls) = counting_fetcher(
        "getUser",
        response(json!({"user": {"id": 1, "name": "A"}})),
    );
    let params = json!({"id": 1});
    let options = FetchOptions::new();

    cache.fetch(&fetcher, params.clone(), &options).await.unwrap();
    cache.quiesce().await;

    cache.reset_operation("getUser").unwrap();
    assert_eq!(cache.peek_head("getUser", &params).unwrap(), None);

    // request tier is gone, entity tier is not
    cache
        .fetch_by_id("user", &json!(1), &fetcher, params.clone(), &options)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cache.reset_entities().unwrap();
    cache
        .fetch_by_id("user", &json!(1), &fetcher, params.clone(), &options)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    cache.quiesce().await;
    cache.reset_operations().unwrap();
    cache.fetch(&fetcher, params, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn entity_capacity_eviction_invalidates_request() {
    let cache = Cache::new(
        CacheConfig::new()
            .with_default_entity_policy(CachePolicy::new(2))
            .with_default_request_policy(CachePolicy::new(10)),
    );
    let (fetcher, calls) = counting_fetcher(
        "listUsers",
        response(json!({"user": [{"id": 1}, {"id": 2}, {"id": 3}]})),
    );

    cache.fetch(&fetcher, Value::Null, &FetchOptions::new()).await.unwrap();
    cache.quiesce().await;

    // three entities through a two-entry store evicted the first, so
    // the request record no longer fully resolves
    assert_eq!(cache.peek_body("listUsers", &Value::Null).unwrap(), None);

    cache.fetch(&fetcher, Value::Null, &FetchOptions::new()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn request_ttl_expiry_forces_refetch() {
    let cache = Cache::new(
        CacheConfig::new()
            .with_default_entity_policy(CachePolicy::new(10))
            .with_default_request_policy(
                CachePolicy::new(10).with_ttl(Duration::from_millis(20)),
            ),
    );
    let (fetcher, calls) = counting_fetcher("getUser", response(json!({"user": {"id": 1}})));
    let params = json!({"id": 1});
    let options = FetchOptions::new();

    cache.fetch(&fetcher, params.clone(), &options).await.unwrap();
    cache.quiesce().await;

    cache.fetch(&fetcher, params.clone(), &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;

    cache.fetch(&fetcher, params, &options).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_identical_fetches_are_not_coalesced() {
    let cache = Cache::new(config());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let counter = Arc::clone(&calls);
    let gate = Arc::clone(&barrier);
    let fetcher = fetch_fn("getUser", move |_params| {
        let counter = Arc::clone(&counter);
        let gate = Arc::clone(&gate);
        async move {
            // both in-flight fetches must reach this point for either
            // to proceed; coalescing would deadlock here
            gate.wait().await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Response, BoxError>(response(json!({"user": {"id": 1}})))
        }
    });

    let params = json!({"id": 1});
    let options = FetchOptions::new();
    let (a, b) = tokio::join!(
        cache.fetch(&fetcher, params.clone(), &options),
        cache.fetch(&fetcher, params.clone(), &options),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    cache.quiesce().await;
    assert!(cache.peek_body("getUser", &params).unwrap().is_some());
}
