use super::*;
use shared::{error::RequestError, protocol::Metadata};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

const TTL: Duration = Duration::from_secs(30);

fn cache<T: Send + Sync + 'static>() -> ResultCache<T> {
    ResultCache::new("test", CachePolicy::new(TTL).with_gc_grace(Duration::from_secs(60)))
}

/// Wraps `fetch` in a factory that records each time a fetch is started.
fn counted<T, Fut>(
    calls: &Arc<AtomicUsize>,
    fetch: Fut,
) -> impl FnOnce(CancellationToken) -> Fut
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    let calls = Arc::clone(calls);
    move |_cancel| {
        calls.fetch_add(1, Ordering::SeqCst);
        fetch
    }
}

async fn let_tasks_run() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn concurrent_gets_for_same_key_share_one_fetch() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");
    let (release, gate) = oneshot::channel::<()>();

    let mut first = cache.get(
        &key,
        counted(&calls, async move {
            let _ = gate.await;
            Ok(7)
        }),
    );
    let second = cache.get(&key, counted(&calls, async { Ok(99) }));

    assert_eq!(first.lookup(), CacheLookup::Miss);
    assert_eq!(second.lookup(), CacheLookup::Joined);
    assert_eq!(second.current().status, EntryStatus::Pending);

    release.send(()).expect("release");
    let settled = first.settled().await;

    assert_eq!(settled.data.as_deref(), Some(&7));
    assert_eq!(second.current().data.as_deref(), Some(&7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fresh_entry_is_returned_without_fetching() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");

    let mut first = cache.get(&key, counted(&calls, async { Ok(1) }));
    first.settled().await;
    let second = cache.get(&key, counted(&calls, async { Ok(2) }));

    assert_eq!(second.lookup(), CacheLookup::Hit);
    assert_eq!(second.current().data.as_deref(), Some(&1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_served_while_revalidating() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");

    let mut first = cache.get(&key, counted(&calls, async { Ok(1) }));
    first.settled().await;
    tokio::time::advance(TTL + Duration::from_secs(1)).await;

    let (release, gate) = oneshot::channel::<()>();
    let mut second = cache.get(
        &key,
        counted(&calls, async move {
            let _ = gate.await;
            Ok(2)
        }),
    );

    let served = second.current();
    assert_eq!(second.lookup(), CacheLookup::Stale);
    assert_eq!(served.status, EntryStatus::Success);
    assert_eq!(served.data.as_deref(), Some(&1));
    assert!(served.is_revalidating);

    release.send(()).expect("release");
    let refreshed = second.settled().await;
    assert_eq!(refreshed.data.as_deref(), Some(&2));
    assert!(!refreshed.is_revalidating);
    assert_eq!(first.current().data.as_deref(), Some(&2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_metadata_fetch_is_not_retried_within_ttl() {
    let cache = cache::<Metadata>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::metadata();
    let db_down = FetchError::Request(RequestError::new(500, "db down"));

    let failure = db_down.clone();
    let mut first = cache.get(&key, counted(&calls, async move { Err(failure) }));
    let snapshot = first.settled().await;
    assert_eq!(snapshot.status, EntryStatus::Error);
    assert_eq!(snapshot.error, Some(db_down.clone()));

    let second = cache.get(&key, counted(&calls, async { Ok(Metadata::default()) }));
    let snapshot = second.current();

    assert_eq!(second.lookup(), CacheLookup::Hit);
    assert_eq!(snapshot.status, EntryStatus::Error);
    assert_eq!(snapshot.error, Some(db_down));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_error_is_retried_on_next_get() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");

    let mut first = cache.get(
        &key,
        counted(&calls, async { Err(FetchError::Transport("connection refused".into())) }),
    );
    first.settled().await;
    tokio::time::advance(TTL).await;

    let mut retry = cache.get(&key, counted(&calls, async { Ok(5) }));
    assert_eq!(retry.lookup(), CacheLookup::Stale);
    let snapshot = retry.settled().await;

    assert_eq!(snapshot.status, EntryStatus::Success);
    assert_eq!(snapshot.error, None);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refetch_forces_a_new_fetch() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");

    let mut first = cache.get(&key, counted(&calls, async { Ok(1) }));
    first.settled().await;
    let mut retry = cache.refetch(&key, counted(&calls, async { Ok(2) }));

    assert_eq!(retry.lookup(), CacheLookup::Stale);
    assert_eq!(retry.settled().await.data.as_deref(), Some(&2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidated_entry_revalidates_on_next_get() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");

    let mut first = cache.get(&key, counted(&calls, async { Ok(1) }));
    first.settled().await;
    cache.invalidate(&key);
    let mut second = cache.get(&key, counted(&calls, async { Ok(2) }));

    assert_eq!(second.lookup(), CacheLookup::Stale);
    assert_eq!(second.settled().await.data.as_deref(), Some(&2));
}

#[tokio::test]
async fn cancelled_fetch_never_writes_to_cache() {
    let cache = cache::<u32>();
    let key = CacheKey::new("sales");
    let (release, gate) = oneshot::channel::<()>();

    // The fetch ignores its token, as a transport that cannot abort would.
    let first = cache.get(&key, move |_cancel| async move {
        let _ = gate.await;
        Ok(1)
    });
    assert!(cache.cancel(&key));
    assert!(!cache.cancel(&key), "nothing left in flight");

    release.send(()).expect("release");
    let_tasks_run().await;

    let snapshot = cache.peek(&key).expect("entry");
    assert_eq!(snapshot.status, EntryStatus::Pending);
    assert!(snapshot.data.is_none());
    assert_eq!(first.current().status, EntryStatus::Pending);
}

#[tokio::test]
async fn cancelled_response_cannot_clobber_a_newer_one() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");
    let (release, gate) = oneshot::channel::<()>();

    let _stale = cache.get(&key, move |_cancel| async move {
        let _ = gate.await;
        Ok(1)
    });
    cache.cancel(&key);

    let mut fresh = cache.get(&key, counted(&calls, async { Ok(2) }));
    assert_eq!(fresh.lookup(), CacheLookup::Miss);
    assert_eq!(fresh.settled().await.data.as_deref(), Some(&2));

    release.send(()).expect("release");
    let_tasks_run().await;

    let snapshot = cache.peek(&key).expect("entry");
    assert_eq!(snapshot.data.as_deref(), Some(&2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_passes_signal_to_fetch() {
    let cache = cache::<u32>();
    let key = CacheKey::new("sales");
    let (observed_tx, observed_rx) = oneshot::channel::<bool>();

    let _subscription = cache.get(&key, move |cancel| async move {
        cancel.cancelled().await;
        let _ = observed_tx.send(true);
        Err(FetchError::Cancelled)
    });
    cache.cancel(&key);

    assert!(observed_rx.await.expect("fetch observed cancellation"));
}

#[tokio::test(start_paused = true)]
async fn garbage_collection_skips_referenced_entries() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let held_key = CacheKey::new("held");
    let released_key = CacheKey::new("released");

    let mut held = cache.get(&held_key, counted(&calls, async { Ok(1) }));
    let mut released = cache.get(&released_key, counted(&calls, async { Ok(2) }));
    held.settled().await;
    released.settled().await;
    drop(released);

    tokio::time::advance(TTL + Duration::from_secs(59)).await;
    assert_eq!(cache.collect_garbage(), 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.contains(&held_key));
    assert!(!cache.contains(&released_key));
}

#[tokio::test]
async fn capacity_evicts_least_recently_used_idle_entry() {
    let cache = ResultCache::<u32>::new("test", CachePolicy::new(TTL).with_max_entries(2));
    let calls = Arc::new(AtomicUsize::new(0));
    let [a, b, c] = ["a", "b", "c"].map(CacheKey::new);

    for (key, value) in [(&a, 1), (&b, 2)] {
        let mut subscription = cache.get(key, counted(&calls, async move { Ok(value) }));
        subscription.settled().await;
    }
    // Touch `a` so `b` becomes the least recently used.
    drop(cache.get(&a, counted(&calls, async { Ok(10) })));

    let mut newest = cache.get(&c, counted(&calls, async { Ok(3) }));
    newest.settled().await;

    assert_eq!(cache.len(), 2);
    assert!(cache.contains(&a));
    assert!(!cache.contains(&b));
    assert!(cache.contains(&c));
}

#[tokio::test]
async fn capacity_never_evicts_subscribed_entries() {
    let cache = ResultCache::<u32>::new("test", CachePolicy::new(TTL).with_max_entries(1));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut first = cache.get(&CacheKey::new("a"), counted(&calls, async { Ok(1) }));
    let mut second = cache.get(&CacheKey::new("b"), counted(&calls, async { Ok(2) }));
    first.settled().await;
    second.settled().await;

    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn changed_reports_each_transition() {
    let cache = cache::<u32>();
    let key = CacheKey::new("sales");
    let (release, gate) = oneshot::channel::<()>();

    let mut subscription = cache.get(&key, move |_cancel| async move {
        let _ = gate.await;
        Ok(4)
    });
    release.send(()).expect("release");

    let update = subscription.changed().await.expect("update");
    assert_eq!(update.status, EntryStatus::Success);
    assert_eq!(update.data.as_deref(), Some(&4));
}

#[tokio::test]
async fn cancelling_first_fetch_releases_waiters() {
    let cache = cache::<u32>();
    let key = CacheKey::new("sales");

    let mut subscription = cache.get(&key, |cancel| async move {
        cancel.cancelled().await;
        Err(FetchError::Cancelled)
    });
    let waiter = tokio::spawn({
        let mut receiver = subscription.watch();
        async move {
            let _ = receiver.changed().await;
        }
    });
    let_tasks_run().await;
    assert!(cache.cancel(&key));

    let snapshot = tokio::time::timeout(Duration::from_secs(3), subscription.settled())
        .await
        .expect("settled after cancel");
    tokio::time::timeout(Duration::from_secs(3), waiter)
        .await
        .expect("change notified")
        .expect("waiter task");

    assert_eq!(snapshot.status, EntryStatus::Pending);
    assert!(snapshot.is_cancelled);
    assert!(snapshot.data.is_none());
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn fetch_reporting_cancellation_is_settled() {
    let cache = cache::<u32>();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("sales");

    let mut subscription = cache.get(&key, |_cancel| async { Err(FetchError::Cancelled) });
    let snapshot = tokio::time::timeout(Duration::from_secs(3), subscription.settled())
        .await
        .expect("settled");
    assert_eq!(snapshot.status, EntryStatus::Pending);
    assert!(snapshot.is_cancelled);

    let mut retry = cache.get(&key, counted(&calls, async { Ok(8) }));
    assert_eq!(retry.lookup(), CacheLookup::Miss);
    assert!(!retry.current().is_cancelled);
    let snapshot = retry.settled().await;

    assert_eq!(snapshot.data.as_deref(), Some(&8));
    assert!(!snapshot.is_cancelled);
}
