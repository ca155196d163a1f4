// Integration tests for registry identity and request deduplication

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use refetch::prelude::*;
use tokio::time::{sleep, timeout, Duration};

fn counting_fetcher(
    calls: Arc<AtomicU32>,
    value: i32,
) -> impl Fn() -> BoxFuture<'static, Result<i32, FetchError>> + Send + Sync + 'static {
    move || {
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }
}

async fn wait_for_success(engine: &QueryEngine<i32>) -> QueryState<i32> {
    timeout(Duration::from_secs(2), async {
        let mut states = engine.watch();
        loop {
            let state = states.next().await.expect("state stream ended");
            if state.is_success() {
                return state;
            }
        }
    })
    .await
    .expect("timed out waiting for success")
}

#[tokio::test]
async fn test_same_key_returns_identical_engine() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let first = registry
        .get_or_create_query(
            ["user", "123"],
            counting_fetcher(calls.clone(), 1),
            QueryConfig::default(),
        )
        .unwrap();
    let second = registry
        .get_or_create_query(
            ["user", "123"],
            counting_fetcher(calls.clone(), 2),
            QueryConfig::default(),
        )
        .unwrap();

    // the second lookup returned the first engine: seeding data through
    // one handle is visible through the other
    wait_for_success(&first).await;
    first.set_data(99);
    assert_eq!(second.state().data, Some(99));
    assert_eq!(first.canonical_key(), second.canonical_key());
}

#[tokio::test]
async fn test_equal_keys_share_one_fetch() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    // a fetcher slow enough that both lookups happen while it's in flight
    let slow = {
        let calls = calls.clone();
        move || -> BoxFuture<'static, Result<i32, FetchError>> {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok(7)
            })
        }
    };

    let config = QueryConfig::default().with_stale_time(Duration::from_secs(60));
    let a = registry
        .get_or_create_query(["profile"], slow.clone(), config.clone())
        .unwrap();
    let b = registry
        .get_or_create_query(["profile"], slow, config)
        .unwrap();

    // drive both handles concurrently; the engine coalesces them
    tokio::join!(a.fetch(false), b.fetch(false));
    wait_for_success(&a).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1, "one engine, one fetch");
    assert_eq!(b.state().data, Some(7));
}

#[tokio::test]
async fn test_different_keys_get_different_engines() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let a = registry
        .get_or_create_query(["user", "1"], counting_fetcher(calls.clone(), 1), QueryConfig::default())
        .unwrap();
    let b = registry
        .get_or_create_query(["user", "2"], counting_fetcher(calls.clone(), 2), QueryConfig::default())
        .unwrap();

    wait_for_success(&a).await;
    wait_for_success(&b).await;

    assert_eq!(a.state().data, Some(1));
    assert_eq!(b.state().data, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_infinite_query_identity() {
    let registry = QueryRegistry::new();

    let make_pagination =
        || Pagination::<Vec<u32>, u32>::new(None, |_last, all| Some(all.len() as u32));
    let fetcher = |_cursor: Option<u32>| -> BoxFuture<'static, Result<Vec<u32>, FetchError>> {
        Box::pin(async { Ok(vec![1, 2, 3]) })
    };

    let first = registry
        .get_or_create_infinite_query(["feed"], fetcher, make_pagination(), QueryConfig::default())
        .unwrap();
    let second = registry
        .get_or_create_infinite_query(["feed"], fetcher, make_pagination(), QueryConfig::default())
        .unwrap();

    assert_eq!(first.canonical_key(), second.canonical_key());

    timeout(Duration::from_secs(2), async {
        let mut states = first.watch();
        loop {
            let state = states.next().await.expect("state stream ended");
            if state.is_success() {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for first page");

    // both handles observe the same sequence
    assert_eq!(second.state().pages.len(), 1);
}

#[tokio::test]
async fn test_dispose_stops_every_engine() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_query(
            ["doomed"],
            counting_fetcher(calls.clone(), 1),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for_success(&engine).await;

    registry.dispose();
    assert!(engine.is_disposed());

    // emissions and fetches are dropped after dispose
    let before = engine.state();
    engine.set_data(123);
    engine.refetch().await;
    assert_eq!(engine.state().data, before.data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_late_subscriber_receives_current_state_first() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_query(
            ["warm"],
            counting_fetcher(calls.clone(), 5),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for_success(&engine).await;

    // a subscriber arriving long after the fetch still renders immediately
    let mut states = engine.watch();
    let first = timeout(Duration::from_millis(100), states.next())
        .await
        .expect("late subscriber should not wait")
        .expect("state stream ended");
    assert!(first.is_success());
    assert_eq!(first.data, Some(5));
}
