use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use lru::LruCache;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::FetchError, normalize::CacheKey};

const DEFAULT_GC_GRACE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug)]
pub struct QuerySnapshot<T> {
    pub status: EntryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<FetchError>,
    pub fetched_at: Option<Instant>,
    /// A refetch is running while the previous outcome is still served.
    pub is_revalidating: bool,
    pub is_cancelled: bool,
}

impl<T> Clone for QuerySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            is_revalidating: self.is_revalidating,
            is_cancelled: self.is_cancelled,
        }
    }
}

impl<T> QuerySnapshot<T> {
    fn pending() -> Self {
        Self {
            status: EntryStatus::Pending,
            data: None,
            error: None,
            fetched_at: None,
            is_revalidating: false,
            is_cancelled: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        (self.status != EntryStatus::Pending || self.is_cancelled) && !self.is_revalidating
    }

    fn mark_cancelled(&mut self) {
        self.is_revalidating = false;
        self.is_cancelled = self.status == EntryStatus::Pending;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub gc_grace: Duration,
    /// Soft cap; entries with subscribers or a fetch in flight are never evicted.
    pub max_entries: usize,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            gc_grace: DEFAULT_GC_GRACE,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_gc_grace(mut self, gc_grace: Duration) -> Self {
        self.gc_grace = gc_grace;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Stale,
    Joined,
    Miss,
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

struct CacheEntry<T> {
    id: u64,
    state: watch::Sender<QuerySnapshot<T>>,
    subscribers: usize,
    in_flight: Option<InFlight>,
    invalidated: bool,
    last_active: Instant,
}

impl<T> CacheEntry<T> {
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        if self.invalidated {
            return true;
        }
        match self.state.borrow().fetched_at {
            Some(at) => now.saturating_duration_since(at) >= ttl,
            None => true,
        }
    }

    fn has_outcome(&self) -> bool {
        self.state.borrow().status != EntryStatus::Pending
    }

    fn is_idle(&self) -> bool {
        self.subscribers == 0 && self.in_flight.is_none()
    }

    fn is_collectable(&self, now: Instant, policy: &CachePolicy) -> bool {
        if !self.is_idle() {
            return false;
        }
        let since = self.state.borrow().fetched_at.unwrap_or(self.last_active);
        now.saturating_duration_since(since) >= policy.ttl + policy.gc_grace
    }
}

struct CacheInner<T> {
    entries: LruCache<CacheKey, CacheEntry<T>>,
    next_id: u64,
}

impl<T> CacheInner<T> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn lock_inner<T>(inner: &Mutex<CacheInner<T>>) -> MutexGuard<'_, CacheInner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// At most one fetch runs per key. A cancelled or superseded fetch never writes its outcome.
pub struct ResultCache<T> {
    name: &'static str,
    policy: CachePolicy,
    inner: Arc<Mutex<CacheInner<T>>>,
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            policy: self.policy,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ResultCache<T> {
    pub fn new(name: &'static str, policy: CachePolicy) -> Self {
        Self {
            name,
            policy,
            inner: Arc::new(Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                next_id: 0,
            })),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Must be called inside a Tokio runtime.
    pub fn get<F, Fut>(&self, key: &CacheKey, factory: F) -> Subscription<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.subscribe(key, factory, false)
    }

    pub fn refetch<F, Fut>(&self, key: &CacheKey, factory: F) -> Subscription<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.subscribe(key, factory, true)
    }

    fn subscribe<F, Fut>(&self, key: &CacheKey, factory: F, force: bool) -> Subscription<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let now = Instant::now();
        let mut inner = lock_inner(&self.inner);
        self.collect_garbage_locked(&mut inner, now);

        let (entry_id, receiver, lookup) = match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.subscribers += 1;
                entry.last_active = now;
                let lookup = if entry.in_flight.is_some() {
                    CacheLookup::Joined
                } else if force || entry.is_stale(now, self.policy.ttl) {
                    if entry.has_outcome() {
                        CacheLookup::Stale
                    } else {
                        CacheLookup::Miss
                    }
                } else {
                    CacheLookup::Hit
                };
                (entry.id, entry.state.subscribe(), lookup)
            }
            None => {
                let id = inner.next_id();
                let (state, receiver) = watch::channel(QuerySnapshot::pending());
                inner.entries.put(
                    key.clone(),
                    CacheEntry {
                        id,
                        state,
                        subscribers: 1,
                        in_flight: None,
                        invalidated: false,
                        last_active: now,
                    },
                );
                (id, receiver, CacheLookup::Miss)
            }
        };

        match lookup {
            CacheLookup::Hit => debug!("cache: hit cache={} key={key}", self.name),
            CacheLookup::Joined => debug!("cache: joined in-flight fetch cache={} key={key}", self.name),
            CacheLookup::Stale | CacheLookup::Miss => {
                self.start_fetch_locked(&mut inner, key, factory, lookup)
            }
        }
        self.enforce_capacity_locked(&mut inner);

        Subscription {
            key: key.clone(),
            entry_id,
            lookup,
            receiver,
            cache: Arc::downgrade(&self.inner),
        }
    }

    fn start_fetch_locked<F, Fut>(
        &self,
        inner: &mut CacheInner<T>,
        key: &CacheKey,
        factory: F,
        lookup: CacheLookup,
    ) where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let generation = inner.next_id();
        let Some(entry) = inner.entries.peek_mut(key) else {
            return;
        };

        let token = CancellationToken::new();
        entry.in_flight = Some(InFlight {
            generation,
            token: token.clone(),
        });
        entry.state.send_if_modified(|snapshot| {
            let revalidating = snapshot.status != EntryStatus::Pending;
            let changed = snapshot.is_revalidating != revalidating || snapshot.is_cancelled;
            snapshot.is_revalidating = revalidating;
            snapshot.is_cancelled = false;
            changed
        });
        info!(
            "cache: fetch started cache={} key={key} generation={generation} lookup={lookup:?}",
            self.name
        );

        let fetch = factory(token);
        let cache = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = fetch.await;
            cache.complete(&key, generation, outcome);
        });
    }

    fn complete(&self, key: &CacheKey, generation: u64, outcome: Result<T, FetchError>) {
        let mut inner = lock_inner(&self.inner);
        let Some(entry) = inner.entries.peek_mut(key) else {
            debug!("cache: dropped outcome for evicted entry cache={} key={key}", self.name);
            return;
        };
        let is_current = entry
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation && !f.token.is_cancelled());
        if !is_current {
            debug!(
                "cache: discarded cancelled outcome cache={} key={key} generation={generation}",
                self.name
            );
            return;
        }

        entry.in_flight = None;
        let now = Instant::now();
        entry.last_active = now;
        match outcome {
            Ok(data) => {
                entry.invalidated = false;
                entry.state.send_modify(|snapshot| {
                    snapshot.status = EntryStatus::Success;
                    snapshot.data = Some(Arc::new(data));
                    snapshot.error = None;
                    snapshot.fetched_at = Some(now);
                    snapshot.is_revalidating = false;
                });
                info!("cache: fetch succeeded cache={} key={key}", self.name);
            }
            Err(FetchError::Cancelled) => {
                entry.state.send_modify(QuerySnapshot::mark_cancelled);
                debug!("cache: fetch reported cancellation cache={} key={key}", self.name);
            }
            Err(err) => {
                warn!("cache: fetch failed cache={} key={key} error={err}", self.name);
                entry.invalidated = false;
                entry.state.send_modify(|snapshot| {
                    snapshot.status = EntryStatus::Error;
                    snapshot.error = Some(err);
                    snapshot.fetched_at = Some(now);
                    snapshot.is_revalidating = false;
                });
            }
        }
    }

    pub fn cancel(&self, key: &CacheKey) -> bool {
        let mut inner = lock_inner(&self.inner);
        let Some(entry) = inner.entries.peek_mut(key) else {
            return false;
        };
        let Some(in_flight) = entry.in_flight.take() else {
            return false;
        };
        in_flight.token.cancel();
        entry.state.send_modify(QuerySnapshot::mark_cancelled);
        info!(
            "cache: fetch cancelled cache={} key={key} generation={}",
            self.name, in_flight.generation
        );
        true
    }

    pub fn invalidate(&self, key: &CacheKey) {
        let mut inner = lock_inner(&self.inner);
        if let Some(entry) = inner.entries.peek_mut(key) {
            entry.invalidated = true;
        }
    }

    pub fn peek(&self, key: &CacheKey) -> Option<QuerySnapshot<T>> {
        let inner = lock_inner(&self.inner);
        inner.entries.peek(key).map(|entry| entry.state.borrow().clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        lock_inner(&self.inner).entries.contains(key)
    }

    pub fn len(&self) -> usize {
        lock_inner(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collect_garbage(&self) -> usize {
        let mut inner = lock_inner(&self.inner);
        self.collect_garbage_locked(&mut inner, Instant::now())
    }

    fn collect_garbage_locked(&self, inner: &mut CacheInner<T>, now: Instant) -> usize {
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_collectable(now, &self.policy))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
            debug!("cache: collected cache={} key={key}", self.name);
        }
        expired.len()
    }

    fn enforce_capacity_locked(&self, inner: &mut CacheInner<T>) {
        while inner.entries.len() > self.policy.max_entries {
            let victim = inner
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| entry.is_idle())
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            inner.entries.pop(&victim);
            debug!("cache: evicted least recently used cache={} key={victim}", self.name);
        }
    }
}

/// A live interest in one cache entry. Dropping it releases the entry.
pub struct Subscription<T> {
    key: CacheKey,
    entry_id: u64,
    lookup: CacheLookup,
    receiver: watch::Receiver<QuerySnapshot<T>>,
    cache: Weak<Mutex<CacheInner<T>>>,
}

impl<T> Subscription<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn lookup(&self) -> CacheLookup {
        self.lookup
    }

    pub fn current(&self) -> QuerySnapshot<T> {
        self.receiver.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QuerySnapshot<T>> {
        self.receiver.clone()
    }

    pub async fn changed(&mut self) -> Option<QuerySnapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Waits until no fetch is running for the entry.
    pub async fn settled(&mut self) -> QuerySnapshot<T> {
        let settled = match self.receiver.wait_for(QuerySnapshot::is_settled).await {
            Ok(snapshot) => Some((*snapshot).clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.current())
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut inner = lock_inner(&inner);
        if let Some(entry) = inner.entries.peek_mut(&self.key) {
            if entry.id == self.entry_id {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                entry.last_active = Instant::now();
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
