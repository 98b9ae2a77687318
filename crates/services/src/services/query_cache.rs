//! Keyed cache of query results shared by the team queries and mutations.
//!
//! Reads and writes are synchronous and never yield, so a caller can take a
//! snapshot and write an optimistic value without another task interleaving
//! on the same key. Background refreshes register themselves per key and can
//! be cancelled before a mutation touches that key.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use db::models::collection::Collection;
use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identifies a cached result set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    List { collection: Collection },
    Detail { collection: Collection, id: Uuid },
}

impl QueryKey {
    pub fn list(collection: Collection) -> Self {
        Self::List { collection }
    }

    pub fn detail(collection: Collection, id: Uuid) -> Self {
        Self::Detail { collection, id }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List { collection } => write!(f, "{collection}"),
            Self::Detail { collection, id } => write!(f, "{collection}/{id}"),
        }
    }
}

/// Cached value: a whole list, or a single lookup that may have found nothing
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData<R> {
    List(Vec<R>),
    Record(Option<R>),
}

impl<R> QueryData<R> {
    pub fn into_list(self) -> Option<Vec<R>> {
        match self {
            Self::List(items) => Some(items),
            Self::Record(_) => None,
        }
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            Self::Record(record) => record,
            Self::List(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Removed(QueryKey),
    Stale(QueryKey),
}

/// Value held for one key before a mutation touched it. `None` means the key
/// had no entry, and restoring removes it again.
#[derive(Debug, Clone)]
pub struct Snapshot<R> {
    key: QueryKey,
    data: Option<QueryData<R>>,
}

impl<R> Snapshot<R> {
    pub fn data(&self) -> Option<&QueryData<R>> {
        self.data.as_ref()
    }
}

/// Result of [`QueryCache::fetch`]
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome<R> {
    Stored(QueryData<R>),
    Cancelled,
}

#[derive(Debug, Clone)]
struct CacheEntry<R> {
    data: QueryData<R>,
    stale: bool,
}

struct InFlight {
    id: u64,
    token: CancellationToken,
    finished: watch::Receiver<()>,
}

/// Removes its in-flight registration and signals waiters when dropped
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<QueryKey, Vec<InFlight>>,
    key: QueryKey,
    id: u64,
    _finished: watch::Sender<()>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if_mut(&self.key, |_, refreshes| {
                refreshes.retain(|r| r.id != self.id);
                refreshes.is_empty()
            });
    }
}

pub struct QueryCache<R> {
    entries: DashMap<QueryKey, CacheEntry<R>>,
    in_flight: DashMap<QueryKey, Vec<InFlight>>,
    subscribers: DashMap<QueryKey, usize>,
    events: broadcast::Sender<CacheEvent>,
    next_refresh_id: AtomicU64,
}

impl<R> Default for QueryCache<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> QueryCache<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            subscribers: DashMap::new(),
            events,
            next_refresh_id: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<QueryData<R>> {
        self.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Cached value only if it has not been marked stale
    pub fn get_fresh(&self, key: &QueryKey) -> Option<QueryData<R>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.data.clone())
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_none_or(|entry| entry.stale)
    }

    pub fn set(&self, key: QueryKey, data: QueryData<R>) {
        trace!(key = %key, "cache set");
        self.entries.insert(key.clone(), fresh_entry(data));
        self.emit(CacheEvent::Updated(key));
    }

    /// Read-modify-write of one key without yielding in between
    pub fn update<F>(&self, key: QueryKey, f: F)
    where
        F: FnOnce(Option<QueryData<R>>) -> QueryData<R>,
    {
        {
            let mut slot = self.entries.entry(key.clone());
            let current = match &mut slot {
                Entry::Occupied(entry) => Some(entry.get().data.clone()),
                Entry::Vacant(_) => None,
            };
            slot.insert(fresh_entry(f(current)));
        }
        trace!(key = %key, "cache update");
        self.emit(CacheEvent::Updated(key));
    }

    pub fn remove(&self, key: &QueryKey) {
        if self.entries.remove(key).is_some() {
            trace!(key = %key, "cache remove");
            self.emit(CacheEvent::Removed(key.clone()));
        }
    }

    pub fn snapshot(&self, key: &QueryKey) -> Snapshot<R> {
        Snapshot {
            key: key.clone(),
            data: self.get(key),
        }
    }

    /// Put a key back exactly as it was when the snapshot was taken
    pub fn restore(&self, snapshot: Snapshot<R>) {
        debug!(key = %snapshot.key, "cache restore");
        match snapshot.data {
            Some(data) => self.set(snapshot.key, data),
            None => self.remove(&snapshot.key),
        }
    }

    /// Flag a key for re-fetch and notify listeners
    pub fn mark_stale(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        debug!(key = %key, subscribers = self.subscriber_count(key), "cache mark stale");
        self.emit(CacheEvent::Stale(key.clone()));
    }

    /// Cancel refreshes running for `key` and wait until all of them have stopped.
    /// A cancelled refresh never writes to the cache.
    pub async fn cancel_in_flight(&self, key: &QueryKey) {
        let waiting: Vec<watch::Receiver<()>> = match self.in_flight.remove(key) {
            Some((_, refreshes)) => refreshes
                .into_iter()
                .map(|refresh| {
                    refresh.token.cancel();
                    refresh.finished
                })
                .collect(),
            None => return,
        };

        debug!(key = %key, count = waiting.len(), "cancelling in-flight refreshes");
        join_all(waiting.into_iter().map(|mut finished| async move {
            // Resolves with an error once the refresh drops its sender
            let _ = finished.changed().await;
        }))
        .await;
    }

    pub fn in_flight_count(&self, key: &QueryKey) -> usize {
        self.in_flight.get(key).map_or(0, |refreshes| refreshes.len())
    }

    /// Run `fetcher` as a cancellable refresh of `key`, storing its result
    /// unless [`cancel_in_flight`](Self::cancel_in_flight) ran in the meantime.
    pub async fn fetch<Fut, E>(&self, key: QueryKey, fetcher: Fut) -> Result<RefreshOutcome<R>, E>
    where
        Fut: Future<Output = Result<QueryData<R>, E>>,
    {
        let (guard, token) = self.register_refresh(key.clone());

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = fetcher => Some(result),
        };

        let outcome = match result {
            None => RefreshOutcome::Cancelled,
            // Checked synchronously right before the write, so a cancel that
            // already returned can not be overtaken.
            Some(Ok(_)) if token.is_cancelled() => RefreshOutcome::Cancelled,
            Some(Ok(data)) => {
                self.set(key.clone(), data.clone());
                RefreshOutcome::Stored(data)
            }
            Some(Err(e)) => return Err(e),
        };

        if matches!(outcome, RefreshOutcome::Cancelled) {
            debug!(key = %key, "refresh cancelled");
        }
        drop(guard);
        Ok(outcome)
    }

    fn register_refresh(&self, key: QueryKey) -> (InFlightGuard<'_>, CancellationToken) {
        let id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (sender, receiver) = watch::channel(());

        self.in_flight.entry(key.clone()).or_default().push(InFlight {
            id,
            token: token.clone(),
            finished: receiver,
        });

        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
            id,
            _finished: sender,
        };
        (guard, token)
    }

    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Register an active reader of `key`. Stale keys are only re-fetched in
    /// the background while at least one subscription is alive.
    pub fn subscribe(self: &Arc<Self>, key: QueryKey) -> Subscription<R> {
        *self.subscribers.entry(key.clone()).or_insert(0) += 1;
        Subscription {
            cache: Arc::clone(self),
            key,
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.subscribers.get(key).map_or(0, |count| *count)
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

fn fresh_entry<R>(data: QueryData<R>) -> CacheEntry<R> {
    CacheEntry {
        data,
        stale: false,
    }
}

pub struct Subscription<R>
where
    R: Clone + Send + Sync + 'static,
{
    cache: Arc<QueryCache<R>>,
    key: QueryKey,
}

impl<R> Subscription<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn current(&self) -> Option<QueryData<R>> {
        self.cache.get(&self.key)
    }
}

impl<R> Drop for Subscription<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cache
            .subscribers
            .remove_if_mut(&self.key, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}
