//! Stale-while-revalidate query cache.
//!
//! Each [`CacheKey`] maps to one entry holding the last value, when it was
//! fetched, and the freshness counters observed when that fetch started. At
//! most one fetch per key is in flight; every concurrent reader of a key that
//! has no value yet awaits the same shared future.
//!
//! Fetches run on their own tasks and write their result into the entry
//! before any waiter is woken, so a reader that drops out never cancels work
//! another reader depends on. An initial load whose last waiter goes away is
//! aborted, since nothing would consume it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use verdant_api_types::DashboardSummary;

use crate::application::content::{Audience, InvalidationSink};
use crate::application::store::Committed;
use crate::domain::{
    AppointmentRecord, AppointmentStatus, BlogPostRecord, Entity, EntityKind, ListFilter,
    PublishStatus, Revision,
};

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::revisions::{RevisionTracker, Stamp};
use super::source::{ContentSource, FetchError};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_HIT: &str = "verdant_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "verdant_cache_miss_total";
pub(crate) const METRIC_COALESCED: &str = "verdant_cache_coalesced_total";
pub(crate) const METRIC_REFRESH: &str = "verdant_cache_refresh_total";
pub(crate) const METRIC_REFRESH_FAILED: &str = "verdant_cache_refresh_failed_total";
pub(crate) const METRIC_EVICT: &str = "verdant_cache_evict_total";

type Payload = Arc<dyn Any + Send + Sync>;
type FetchFuture = BoxFuture<'static, Result<Fetched, FetchError>>;
type SharedFetch = Shared<FetchFuture>;

#[derive(Clone)]
struct Fetched {
    value: Payload,
    store_revision: Revision,
}

struct InFlight {
    id: u64,
    stamp: Stamp,
    shared: SharedFetch,
    abort: AbortHandle,
    waiters: usize,
}

struct Entry {
    value: Option<Payload>,
    fetched_at: Instant,
    store_revision: Revision,
    stamp: Stamp,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn loading(flight: InFlight) -> Self {
        Self {
            value: None,
            fetched_at: Instant::now(),
            store_revision: 0,
            stamp: flight.stamp,
            in_flight: Some(flight),
        }
    }
}

struct Inner<S> {
    source: Arc<S>,
    config: CacheConfig,
    entries: Mutex<LruCache<CacheKey, Entry>>,
    tracker: RevisionTracker,
    next_fetch_id: AtomicU64,
}

/// Client-side content cache. Cheap to clone; clones share state.
pub struct ContentCache<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ContentCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Lookup {
    Hit(Payload),
    Wait(SharedFetch, u64),
}

impl<S: ContentSource> ContentCache<S> {
    pub fn new(source: S, config: CacheConfig) -> Self {
        Self::from_arc(Arc::new(source), config)
    }

    pub fn from_arc(source: Arc<S>, config: CacheConfig) -> Self {
        let entries = LruCache::new(config.max_entries_non_zero());
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                entries: Mutex::new(entries),
                tracker: RevisionTracker::new(),
                next_fetch_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a list, serving a cached value immediately when one exists.
    pub async fn list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Result<Arc<Vec<E>>, FetchError> {
        let key = CacheKey::list(E::KIND, audience, filter.clone());
        let payload = self
            .read(&key, self.list_fetch::<E>(audience, filter.clone()))
            .await?;
        downcast(&key, payload)
    }

    /// Read one record, serving a cached value immediately when one exists.
    pub async fn get<E: Entity>(&self, audience: Audience, id: Uuid) -> Result<Arc<E>, FetchError> {
        let key = CacheKey::record(E::KIND, audience, id);
        let payload = self.read(&key, self.record_fetch::<E>(audience, id)).await?;
        downcast(&key, payload)
    }

    /// Fetch a list now and wait for it. Errors are returned rather than swallowed.
    pub async fn refresh_list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Result<Arc<Vec<E>>, FetchError> {
        let key = CacheKey::list(E::KIND, audience, filter.clone());
        let payload = self
            .refresh(&key, self.list_fetch::<E>(audience, filter.clone()))
            .await?;
        downcast(&key, payload)
    }

    pub async fn refresh_record<E: Entity>(
        &self,
        audience: Audience,
        id: Uuid,
    ) -> Result<Arc<E>, FetchError> {
        let key = CacheKey::record(E::KIND, audience, id);
        let payload = self
            .refresh(&key, self.record_fetch::<E>(audience, id))
            .await?;
        downcast(&key, payload)
    }

    /// Cached list value without fetching or touching recency.
    pub fn peek_list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Option<Arc<Vec<E>>> {
        let key = CacheKey::list(E::KIND, audience, filter.clone());
        let entries = mutex_lock(&self.inner.entries, SOURCE, "peek_list");
        let payload = entries.peek(&key)?.value.clone()?;
        payload.downcast::<Vec<E>>().ok()
    }

    /// Whether the cached entry for `key` would be refetched on its next read.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        let entries = mutex_lock(&self.inner.entries, SOURCE, "is_stale");
        entries
            .peek(key)
            .is_none_or(|entry| entry.value.is_none() || self.inner.is_stale(key.kind, entry))
    }

    /// Dashboard counts are never cached.
    pub async fn dashboard(&self) -> Result<DashboardSummary, FetchError> {
        self.inner.source.dashboard().await
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Mark every cached query of `kind` stale. Values stay readable until refetched.
    pub fn invalidate(&self, kind: EntityKind) {
        let stamp = self.inner.tracker.invalidate(kind);
        debug!(%kind, stamp, "cache kind invalidated");
    }

    /// Record a store revision learned out of band.
    pub fn observe_revision(&self, kind: EntityKind, revision: Revision) {
        if self.inner.tracker.observe(kind, revision) {
            debug!(%kind, revision, "newer store revision observed");
        }
    }

    /// Drop every entry and abort in-flight fetches. Used on logout.
    pub fn clear(&self) {
        let mut entries = mutex_lock(&self.inner.entries, SOURCE, "clear");
        for (_, entry) in entries.iter() {
            if let Some(flight) = &entry.in_flight {
                flight.abort.abort();
            }
        }
        let dropped = entries.len();
        entries.clear();
        self.inner.tracker.reset();
        debug!(dropped, "cache cleared");
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub async fn create<E: Entity>(&self, draft: E::Draft) -> Result<Committed<E>, FetchError> {
        let result = self.inner.source.create::<E>(draft).await;
        self.after_write(E::KIND, result)
    }

    pub async fn update<E: Entity>(
        &self,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, FetchError> {
        let result = self.inner.source.update::<E>(id, draft).await;
        self.after_write(E::KIND, result)
    }

    pub async fn patch<E: Entity>(
        &self,
        id: Uuid,
        patch: &Value,
    ) -> Result<Committed<E>, FetchError> {
        let result = self.inner.source.patch::<E>(id, patch).await;
        self.after_write(E::KIND, result)
    }

    pub async fn delete<E: Entity>(&self, id: Uuid) -> Result<Revision, FetchError> {
        let result = self.inner.source.delete::<E>(id).await;
        match &result {
            Ok(revision) => self.mutated(E::KIND, Some(*revision)),
            Err(FetchError::Transport(_)) => self.mutated(E::KIND, None),
            Err(_) => {}
        }
        result
    }

    pub async fn set_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Committed<AppointmentRecord>, FetchError> {
        let result = self.inner.source.set_appointment_status(id, status).await;
        self.after_write(EntityKind::Appointment, result)
    }

    pub async fn set_post_status(
        &self,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Committed<BlogPostRecord>, FetchError> {
        let result = self.inner.source.set_post_status(id, status).await;
        self.after_write(EntityKind::BlogPost, result)
    }

    fn after_write<T>(
        &self,
        kind: EntityKind,
        result: Result<Committed<T>, FetchError>,
    ) -> Result<Committed<T>, FetchError> {
        match &result {
            Ok(committed) => self.mutated(kind, Some(committed.revision)),
            // The write may or may not have landed.
            Err(FetchError::Transport(_)) => self.mutated(kind, None),
            Err(_) => {}
        }
        result
    }

    fn mutated(&self, kind: EntityKind, revision: Option<Revision>) {
        if let Some(revision) = revision {
            self.inner.tracker.observe(kind, revision);
        }
        self.invalidate(kind);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn list_fetch<E: Entity>(
        &self,
        audience: Audience,
        filter: ListFilter,
    ) -> impl FnOnce() -> FetchFuture + use<E, S> {
        let source = Arc::clone(&self.inner.source);
        move || {
            async move {
                let listing = source.list::<E>(audience, &filter).await?;
                Ok(Fetched {
                    value: Arc::new(listing.items) as Payload,
                    store_revision: listing.revision,
                })
            }
            .boxed()
        }
    }

    fn record_fetch<E: Entity>(
        &self,
        audience: Audience,
        id: Uuid,
    ) -> impl FnOnce() -> FetchFuture + use<E, S> {
        let source = Arc::clone(&self.inner.source);
        let baseline = self.inner.baseline(E::KIND);
        move || {
            async move {
                let entity = source.get::<E>(audience, id).await?;
                Ok(Fetched {
                    value: Arc::new(entity) as Payload,
                    store_revision: baseline,
                })
            }
            .boxed()
        }
    }

    async fn read<F>(&self, key: &CacheKey, fetch: F) -> Result<Payload, FetchError>
    where
        F: FnOnce() -> FetchFuture,
    {
        match self.lookup(key, fetch) {
            Lookup::Hit(value) => Ok(value),
            Lookup::Wait(shared, fetch_id) => self.wait(key, shared, fetch_id).await,
        }
    }

    fn lookup<F>(&self, key: &CacheKey, fetch: F) -> Lookup
    where
        F: FnOnce() -> FetchFuture,
    {
        let kind = key.kind.as_str();
        let mut entries = mutex_lock(&self.inner.entries, SOURCE, "lookup");

        if let Some(entry) = entries.get_mut(key) {
            if let Some(value) = entry.value.clone() {
                counter!(METRIC_HIT, "kind" => kind).increment(1);
                if entry.in_flight.is_none() && self.inner.is_stale(key.kind, entry) {
                    counter!(METRIC_REFRESH, "kind" => kind).increment(1);
                    debug!(key = %key, "serving stale value; refreshing in background");
                    entry.in_flight = Some(Inner::spawn_fetch(&self.inner, key, fetch()));
                }
                return Lookup::Hit(value);
            }
            if let Some(flight) = entry.in_flight.as_mut() {
                counter!(METRIC_COALESCED, "kind" => kind).increment(1);
                flight.waiters += 1;
                return Lookup::Wait(flight.shared.clone(), flight.id);
            }
        }

        counter!(METRIC_MISS, "kind" => kind).increment(1);
        let mut flight = Inner::spawn_fetch(&self.inner, key, fetch());
        flight.waiters = 1;
        let lookup = Lookup::Wait(flight.shared.clone(), flight.id);
        self.inner
            .insert_entry(&mut entries, key, Entry::loading(flight));
        lookup
    }

    async fn refresh<F>(&self, key: &CacheKey, fetch: F) -> Result<Payload, FetchError>
    where
        F: FnOnce() -> FetchFuture,
    {
        let (shared, fetch_id) = {
            let mut entries = mutex_lock(&self.inner.entries, SOURCE, "refresh");
            let current = self.inner.tracker.stamp(key.kind);
            counter!(METRIC_REFRESH, "kind" => key.kind.as_str()).increment(1);

            match entries.get_mut(key) {
                Some(entry) => match entry.in_flight.as_mut() {
                    // A fetch started after the last invalidation is as good as a new one.
                    Some(flight) if flight.stamp == current => {
                        flight.waiters += 1;
                        (flight.shared.clone(), flight.id)
                    }
                    _ => {
                        let mut flight = Inner::spawn_fetch(&self.inner, key, fetch());
                        flight.waiters = 1;
                        let handle = (flight.shared.clone(), flight.id);
                        entry.in_flight = Some(flight);
                        handle
                    }
                },
                None => {
                    let mut flight = Inner::spawn_fetch(&self.inner, key, fetch());
                    flight.waiters = 1;
                    let handle = (flight.shared.clone(), flight.id);
                    self.inner
                        .insert_entry(&mut entries, key, Entry::loading(flight));
                    handle
                }
            }
        };
        self.wait(key, shared, fetch_id).await
    }

    async fn wait(
        &self,
        key: &CacheKey,
        shared: SharedFetch,
        fetch_id: u64,
    ) -> Result<Payload, FetchError> {
        let interest = Interest {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            fetch_id,
        };
        let result = shared.await;
        drop(interest);
        result.map(|fetched| fetched.value)
    }
}

impl<S: ContentSource> Inner<S> {
    fn is_stale(&self, kind: EntityKind, entry: &Entry) -> bool {
        entry.fetched_at.elapsed() >= self.config.stale_after
            || entry.stamp < self.tracker.stamp(kind)
            || entry.store_revision < self.tracker.known(kind)
            || self
                .source
                .latest_revision(kind)
                .is_some_and(|latest| latest > entry.store_revision)
    }

    /// Revision a fetch that carries none of its own can claim as its floor.
    fn baseline(&self, kind: EntityKind) -> Revision {
        let known = self.tracker.known(kind);
        self.source
            .latest_revision(kind)
            .map_or(known, |latest| latest.max(known))
    }

    fn spawn_fetch(inner: &Arc<Self>, key: &CacheKey, fetch: FetchFuture) -> InFlight {
        let id = inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let stamp = inner.tracker.stamp(key.kind);
        let task_inner = Arc::clone(inner);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(fetch)
                .catch_unwind()
                .await
                .unwrap_or(Err(FetchError::Aborted));
            task_inner.complete(&task_key, id, stamp, &result);
            result
        });
        let abort = handle.abort_handle();
        let shared = handle
            .map(|joined| joined.unwrap_or(Err(FetchError::Aborted)))
            .boxed()
            .shared();

        InFlight {
            id,
            stamp,
            shared,
            abort,
            waiters: 0,
        }
    }

    /// Store a finished fetch. Runs on the fetch task before waiters resume.
    fn complete(
        &self,
        key: &CacheKey,
        fetch_id: u64,
        stamp: Stamp,
        result: &Result<Fetched, FetchError>,
    ) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "complete");
        let Some(entry) = entries.peek_mut(key) else {
            debug!(key = %key, "fetch finished for an entry that is gone");
            return;
        };
        if entry.in_flight.as_ref().map(|flight| flight.id) != Some(fetch_id) {
            debug!(key = %key, fetch_id, "superseded fetch discarded");
            return;
        }
        entry.in_flight = None;
        let had_value = entry.value.is_some();

        match result {
            Ok(fetched) => {
                entry.value = Some(Arc::clone(&fetched.value));
                entry.fetched_at = Instant::now();
                entry.store_revision = fetched.store_revision;
                // The stamp from fetch start: an invalidation that raced the
                // fetch leaves this entry stale.
                entry.stamp = stamp;
                self.tracker.observe(key.kind, fetched.store_revision);
            }
            Err(err) if had_value => {
                counter!(METRIC_REFRESH_FAILED, "kind" => key.kind.as_str()).increment(1);
                warn!(key = %key, error = %err, "background refresh failed; keeping previous value");
            }
            Err(err) => {
                entries.pop(key);
                debug!(key = %key, error = %err, "initial load failed");
            }
        }
    }

    fn insert_entry(
        &self,
        entries: &mut LruCache<CacheKey, Entry>,
        key: &CacheKey,
        entry: Entry,
    ) {
        if let Some((evicted_key, evicted)) = entries.push(key.clone(), entry)
            && evicted_key != *key
        {
            counter!(METRIC_EVICT, "kind" => evicted_key.kind.as_str()).increment(1);
            // An evicted load keeps running for the readers already awaiting
            // it; `complete` finds no entry and drops the value after they wake.
            let loading = evicted.in_flight.is_some();
            debug!(key = %evicted_key, loading, "cache entry evicted");
        }
    }
}

/// Held by each reader awaiting a fetch. When the last reader of an initial
/// load goes away, the load is aborted and its placeholder removed.
struct Interest<S: ContentSource> {
    inner: Arc<Inner<S>>,
    key: CacheKey,
    fetch_id: u64,
}

impl<S: ContentSource> Drop for Interest<S> {
    fn drop(&mut self) {
        let mut entries = mutex_lock(&self.inner.entries, SOURCE, "release_interest");
        let Some(entry) = entries.peek_mut(&self.key) else {
            return;
        };
        let Some(flight) = entry.in_flight.as_mut() else {
            return;
        };
        if flight.id != self.fetch_id {
            return;
        }
        flight.waiters = flight.waiters.saturating_sub(1);
        if flight.waiters == 0 && entry.value.is_none() {
            flight.abort.abort();
            entries.pop(&self.key);
            debug!(key = %self.key, "initial load abandoned; fetch aborted");
        }
    }
}

impl<S: ContentSource> InvalidationSink for ContentCache<S> {
    fn invalidated(&self, kind: EntityKind, revision: Revision) {
        self.observe_revision(kind, revision);
        self.invalidate(kind);
    }
}

fn downcast<T: Send + Sync + 'static>(key: &CacheKey, payload: Payload) -> Result<Arc<T>, FetchError> {
    payload.downcast::<T>().map_err(|_| {
        FetchError::Decode(format!("cached value for {key} has an unexpected type"))
    })
}
