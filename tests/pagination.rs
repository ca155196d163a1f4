// Integration tests for cursor-paginated queries

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use refetch::prelude::*;
use tokio::time::{sleep, timeout, Duration};

/// A fetcher over a fixed "server" of `total` numbered items served in
/// pages of `page_size`; the cursor is the page index.
fn paged_fetcher(
    calls: Arc<AtomicU32>,
    total: u32,
    page_size: u32,
) -> impl Fn(Option<u32>) -> BoxFuture<'static, Result<Vec<u32>, FetchError>> + Send + Sync + 'static
{
    move |cursor: Option<u32>| {
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let page = cursor.unwrap_or(0);
            let start = page * page_size;
            let end = (start + page_size).min(total);
            Ok((start..end).collect())
        })
    }
}

/// Cursor advances while the server kept returning full pages.
fn pagination(page_size: u32) -> Pagination<Vec<u32>, u32> {
    Pagination::new(None, move |last: &Page<Vec<u32>, u32>, all: &[Page<Vec<u32>, u32>]| {
        (last.data.len() as u32 == page_size).then_some(all.len() as u32)
    })
}

async fn wait_for<F>(
    engine: &InfiniteQueryEngine<Vec<u32>, u32>,
    mut predicate: F,
) -> InfiniteQueryState<Vec<u32>, u32>
where
    F: FnMut(&InfiniteQueryState<Vec<u32>, u32>) -> bool,
{
    timeout(Duration::from_secs(2), async {
        let mut states = engine.watch();
        loop {
            let state = states.next().await.expect("state stream ended");
            if predicate(&state) {
                return state;
            }
        }
    })
    .await
    .expect("timed out waiting for state")
}

#[tokio::test]
async fn test_initial_fetch_loads_first_page() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_infinite_query(
            "numbers",
            paged_fetcher(calls.clone(), 5, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();

    let state = wait_for(&engine, InfiniteQueryState::is_success).await;
    assert_eq!(state.pages.len(), 1);
    assert_eq!(state.pages[0].data, vec![0, 1]);
    assert!(state.has_next_page);
    assert!(!state.is_fetching_next_page);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_next_page_appends_exactly_one_page() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_infinite_query(
            "numbers",
            paged_fetcher(calls.clone(), 5, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;

    engine.fetch_next_page().await;
    let state = engine.state();
    assert_eq!(state.pages.len(), 2);
    assert_eq!(state.pages[1].data, vec![2, 3]);
    assert_eq!(state.pages[1].page_param, Some(1));
    assert!(state.has_next_page);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_cursor_stops_fetching() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_infinite_query(
            "numbers",
            paged_fetcher(calls.clone(), 5, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;

    engine.fetch_next_page().await; // [2, 3]
    engine.fetch_next_page().await; // [4] - short page, cursor exhausted
    let state = engine.state();
    assert_eq!(state.pages.len(), 3);
    assert_eq!(state.pages[2].data, vec![4]);
    assert!(!state.has_next_page);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // once the cursor is exhausted, further calls perform no fetch
    engine.fetch_next_page().await;
    engine.fetch_next_page().await;
    assert_eq!(engine.state().pages.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_next_page_keeps_fetched_pages() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_infinite_query(
            "flaky-feed",
            {
                let calls = calls.clone();
                move |cursor: Option<u32>| -> BoxFuture<'static, Result<Vec<u32>, FetchError>> {
                    let calls = calls.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        match cursor {
                            None => Ok(vec![0, 1]),
                            Some(_) => Err(FetchError::Network("dropped".to_string())),
                        }
                    })
                }
            },
            pagination(2),
            QueryConfig::default()
                .with_stale_time(Duration::from_secs(60))
                .with_retry(0, Duration::ZERO),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;

    engine.fetch_next_page().await;
    let state = engine.state();
    // prior pages intact, flag cleared, error surfaced, sequence stale
    assert_eq!(state.pages.len(), 1);
    assert_eq!(state.pages[0].data, vec![0, 1]);
    assert!(!state.is_fetching_next_page);
    assert!(state.is_error());
    assert!(state.error.is_some());
    assert!(state.is_stale);
}

#[tokio::test]
async fn test_refetch_replaces_sequence_with_first_page() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_infinite_query(
            "numbers",
            paged_fetcher(calls.clone(), 6, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;
    engine.fetch_next_page().await;
    assert_eq!(engine.state().pages.len(), 2);

    engine.refetch().await;
    let state = engine.state();
    assert_eq!(state.pages.len(), 1, "refetch reloads only the first page");
    assert_eq!(state.pages[0].data, vec![0, 1]);
    assert!(state.has_next_page);
}

#[tokio::test]
async fn test_refresh_clears_cache_and_state() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    let canonical = QueryKey::from("numbers").canonical();

    let engine = registry
        .get_or_create_infinite_query(
            "numbers",
            paged_fetcher(calls.clone(), 6, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;
    engine.fetch_next_page().await;
    engine.fetch_next_page().await;
    assert_eq!(engine.state().pages.len(), 3);

    engine.refresh().await;
    let state = engine.state();
    assert_eq!(state.pages.len(), 1);
    assert_eq!(state.pages[0].data, vec![0, 1]);

    // the cached sequence was rewritten to the single first page
    let cached = registry
        .cache()
        .get::<Vec<Page<Vec<u32>, u32>>>(&canonical)
        .unwrap();
    assert_eq!(cached.data.len(), 1);
}

#[tokio::test]
async fn test_fetch_previous_page_prepends() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    // start in the middle of the window (page 2); backwards cursor steps
    // down until page 0
    let engine = registry
        .get_or_create_infinite_query(
            "window",
            {
                let calls = calls.clone();
                move |cursor: Option<u32>| -> BoxFuture<'static, Result<Vec<u32>, FetchError>> {
                    let calls = calls.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let page = cursor.unwrap_or(2);
                        Ok(vec![page * 10, page * 10 + 1])
                    })
                }
            },
            Pagination::new(Some(2u32), |_last: &Page<Vec<u32>, u32>, _all: &[Page<Vec<u32>, u32>]| None)
                .with_previous(|first, _all| {
                    first.page_param.and_then(|p| p.checked_sub(1))
                }),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;
    assert_eq!(engine.state().pages[0].data, vec![20, 21]);

    engine.fetch_previous_page().await;
    let state = engine.state();
    assert_eq!(state.pages.len(), 2);
    assert_eq!(state.pages[0].data, vec![10, 11]);
    assert_eq!(state.pages[1].data, vec![20, 21]);
    assert!(!state.is_fetching_previous_page);
}

#[tokio::test]
async fn test_fetch_previous_page_without_hook_is_noop() {
    let registry = QueryRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let engine = registry
        .get_or_create_infinite_query(
            "forward-only",
            paged_fetcher(calls.clone(), 4, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();
    wait_for(&engine, InfiniteQueryState::is_success).await;
    let before = calls.load(Ordering::SeqCst);

    engine.fetch_previous_page().await;
    assert_eq!(calls.load(Ordering::SeqCst), before);
    assert_eq!(engine.state().pages.len(), 1);
}

#[tokio::test]
async fn test_warm_restart_restores_pages_from_durable_tier() {
    let durable = Arc::new(MemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    {
        let registry = QueryRegistry::with_services(
            Arc::new(CacheStore::with_durable(durable.clone())),
            NetworkMonitor::new(),
        );
        let engine = registry
            .get_or_create_infinite_query(
                "numbers",
                paged_fetcher(calls.clone(), 6, 2),
                pagination(2),
                QueryConfig::default().with_stale_time(Duration::from_secs(60)),
            )
            .unwrap();
        wait_for(&engine, InfiniteQueryState::is_success).await;
        engine.fetch_next_page().await;
        registry.dispose();
    }

    // a new registry over the same durable tier serves the stored pages
    // without refetching
    let restarted = QueryRegistry::with_services(
        Arc::new(CacheStore::with_durable(durable)),
        NetworkMonitor::new(),
    );
    let fetches_before = calls.load(Ordering::SeqCst);
    let engine = restarted
        .get_or_create_infinite_query(
            "numbers",
            paged_fetcher(calls.clone(), 6, 2),
            pagination(2),
            QueryConfig::default().with_stale_time(Duration::from_secs(60)),
        )
        .unwrap();

    let state = wait_for(&engine, InfiniteQueryState::is_success).await;
    assert_eq!(state.pages.len(), 2);
    assert_eq!(state.pages[1].data, vec![2, 3]);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), fetches_before);
}
