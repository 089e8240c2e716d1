// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generic cache of long-lived objects with shared loading and reference counting.
//!
//! Objects are created lazily by a [`Loader`] on first access. Concurrent requests for the same
//! key share one load, which runs in its own task so that callers abandoning a request do not
//! cancel it for everyone else. Every successful [`ObjectCache::get`] hands out a [`Handle`] which
//! releases its reference when dropped.
//!
//! Callers waiting for a load are counted as references of the loading entry. The object becomes
//! ready with these references already in place, it can not be evicted before the waiters
//! received it.
//!
//! ```text
//!                 get                    load ok
//!   (absent) ───────────> Loading ─────────────────> Ready(refs)
//!       ^                    │                          │
//!       └────────────────────┘ load failed              │ gc / remove / close
//!       └───────────────────────────────────────────────┘ (object is closed)
//! ```
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::hash::Hash as StdHash;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;

/// Object which can be kept in a cache.
pub trait Object: Send + Sync + 'static {
    /// Release all resources held by the object. Called exactly once, when the object leaves the
    /// cache.
    fn close(&self);
}

/// Creates objects for keys which are not in the cache yet.
pub trait Loader<K, V>: Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    fn load(&self, key: &K) -> impl Future<Output = Result<V, Self::Error>> + Send;
}

/// Outcome of a load as seen by waiting callers.
type LoadOutcome<V, E> = Option<Result<Arc<V>, CacheError<E>>>;

enum EntryState<V, E> {
    Loading(watch::Receiver<LoadOutcome<V, E>>),
    Ready(Arc<V>),
}

struct Entry<V, E> {
    state: EntryState<V, E>,

    /// References of handles, detached handles and callers waiting for the load.
    refs: usize,

    /// Share of `refs` held through [`Handle::detach`]. Only these are given back by
    /// [`ObjectCache::release`].
    detached: usize,

    last_used: Instant,
}

impl<V, E> Entry<V, E> {
    fn loading(rx: watch::Receiver<LoadOutcome<V, E>>) -> Self {
        Self {
            state: EntryState::Loading(rx),
            refs: 1,
            detached: 0,
            last_used: Instant::now(),
        }
    }

    fn ready(object: Arc<V>, refs: usize) -> Self {
        Self {
            state: EntryState::Ready(object),
            refs,
            detached: 0,
            last_used: Instant::now(),
        }
    }

    fn holds(&self, object: &Arc<V>) -> bool {
        matches!(&self.state, EntryState::Ready(current) if Arc::ptr_eq(current, object))
    }
}

struct Entries<K, V, E> {
    entries: HashMap<K, Entry<V, E>>,
    closed: bool,
}

struct Shared<K, V, E> {
    entries: Mutex<Entries<K, V, E>>,
    shutdown: watch::Sender<bool>,
}

impl<K, V, E> Shared<K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    fn lock(&self) -> Result<MutexGuard<'_, Entries<K, V, E>>, CacheError<E>> {
        self.entries.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Drop the reference of a handle to `object`.
    fn release_handle(&self, key: &K, object: &Arc<V>) {
        let Ok(mut entries) = self.lock() else {
            warn!(?key, "release on poisoned cache");
            return;
        };

        // Entries are only evicted without references, a missing entry means the cache was closed.
        if let Some(entry) = entries.entries.get_mut(key) {
            if entry.holds(object) && entry.refs > entry.detached {
                entry.refs -= 1;
                entry.last_used = Instant::now();
                trace!(?key, refs = entry.refs, "release object");
            }
        }
    }

    /// Turn the reference of a handle into a detached one.
    fn detach(&self, key: &K, object: &Arc<V>) {
        let Ok(mut entries) = self.lock() else {
            warn!(?key, "detach on poisoned cache");
            return;
        };

        if let Some(entry) = entries.entries.get_mut(key) {
            if entry.holds(object) && entry.refs > entry.detached {
                entry.detached += 1;
                trace!(?key, detached = entry.detached, "detach object");
            }
        }
    }

    /// Drop one detached reference, returns `false` if there was none.
    fn release_detached(&self, key: &K) -> bool {
        let Ok(mut entries) = self.lock() else {
            warn!(?key, "release on poisoned cache");
            return false;
        };

        match entries.entries.get_mut(key) {
            Some(entry) if entry.detached > 0 => {
                entry.detached -= 1;
                entry.refs -= 1;
                entry.last_used = Instant::now();
                trace!(?key, refs = entry.refs, "release detached object");
                true
            }
            _ => {
                trace!(?key, "ignore release without detached reference");
                false
            }
        }
    }
}

/// Reference of a caller waiting for a load. Given back if the caller stops waiting.
struct Waiter<'a, K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    shared: &'a Shared<K, V, E>,
    key: &'a K,
    rx: watch::Receiver<LoadOutcome<V, E>>,
    done: bool,
}

impl<K, V, E> Drop for Waiter<'_, K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let Ok(mut entries) = self.shared.lock() else {
            return;
        };

        // Outcome and entry state are updated under the same lock.
        let delivered = match &*self.rx.borrow() {
            Some(Ok(object)) => Some(object.clone()),
            _ => None,
        };

        let Some(entry) = entries.entries.get_mut(self.key) else {
            return;
        };

        match (&entry.state, delivered) {
            (EntryState::Loading(rx), None) if rx.same_channel(&self.rx) => {
                entry.refs = entry.refs.saturating_sub(1);
                trace!(key = ?self.key, "stop waiting for load");
            }
            (EntryState::Ready(current), Some(object)) if Arc::ptr_eq(current, &object) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.last_used = Instant::now();
                trace!(key = ?self.key, "drop reference of abandoned request");
            }
            _ => {}
        }
    }
}

/// Concurrent cache of objects of type `V` identified by keys of type `K`.
///
/// Cloning the cache is cheap, all clones share the same entries.
pub struct ObjectCache<K, V, L>
where
    L: Loader<K, V>,
{
    shared: Arc<Shared<K, V, L::Error>>,
    loader: Arc<L>,
    config: CacheConfig,
}

impl<K, V, L> Clone for ObjectCache<K, V, L>
where
    L: Loader<K, V>,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            loader: self.loader.clone(),
            config: self.config.clone(),
        }
    }
}

impl<K, V, L> ObjectCache<K, V, L>
where
    K: Clone + Eq + StdHash + fmt::Debug + Send + Sync + 'static,
    V: Object,
    L: Loader<K, V>,
{
    pub fn new(loader: L, config: CacheConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(Entries {
                    entries: HashMap::new(),
                    closed: false,
                }),
                shutdown,
            }),
            loader: Arc::new(loader),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the object for a key, loading it if necessary.
    ///
    /// Waits while a load for the same key is in flight. Failed loads are not retried, the error is
    /// returned to all callers waiting for it and the next call starts a new load.
    pub async fn get(&self, key: &K) -> Result<Handle<K, V, L::Error>, CacheError<L::Error>> {
        let rx = {
            let mut entries = self.shared.lock()?;
            if entries.closed {
                return Err(CacheError::Closed);
            }

            match entries.entries.get_mut(key) {
                Some(Entry {
                    state: EntryState::Ready(object),
                    refs,
                    last_used,
                    ..
                }) => {
                    *refs += 1;
                    *last_used = Instant::now();
                    trace!(?key, refs = *refs, "get object");
                    return Ok(Handle::new(self.shared.clone(), key.clone(), object.clone()));
                }
                Some(Entry {
                    state: EntryState::Loading(rx),
                    refs,
                    ..
                }) => {
                    *refs += 1;
                    trace!(?key, waiting = *refs, "wait for load");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    entries
                        .entries
                        .insert(key.clone(), Entry::loading(rx.clone()));
                    self.spawn_load(key.clone(), tx);
                    rx
                }
            }
        };

        let mut waiter = Waiter {
            shared: &self.shared,
            key,
            rx,
            done: false,
        };

        let outcome = match waiter.rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        waiter.done = true;

        match outcome {
            // The reference of this caller was counted when the object became ready.
            Some(Ok(object)) => Ok(Handle::new(self.shared.clone(), key.clone(), object)),
            Some(Err(err)) => Err(err),
            None => {
                // Loader task ended without reporting back.
                let mut entries = self.shared.lock()?;
                let is_same_load = matches!(
                    entries.entries.get(key),
                    Some(Entry { state: EntryState::Loading(current), .. }) if current.same_channel(&waiter.rx)
                );
                if is_same_load {
                    entries.entries.remove(key);
                }
                Err(CacheError::LoadAborted)
            }
        }
    }

    fn spawn_load(&self, key: K, tx: watch::Sender<LoadOutcome<V, L::Error>>) {
        let loader = self.loader.clone();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            debug!(?key, "load object");
            let result = loader.load(&key).await;

            let mut entries = match shared.lock() {
                Ok(entries) => entries,
                Err(err) => {
                    let _ = tx.send(Some(Err(err)));
                    return;
                }
            };

            let waiting = match entries.entries.get(&key) {
                Some(Entry {
                    state: EntryState::Loading(_),
                    refs,
                    ..
                }) => *refs,
                _ => 0,
            };

            let outcome = match result {
                // Closing waits for this load and closes the object afterwards.
                Ok(object) if entries.closed => {
                    entries.entries.insert(key, Entry::ready(Arc::new(object), 0));
                    Err(CacheError::Closed)
                }
                Ok(object) => {
                    let object = Arc::new(object);
                    trace!(?key, refs = waiting, "object ready");
                    entries
                        .entries
                        .insert(key, Entry::ready(object.clone(), waiting));
                    Ok(object)
                }
                Err(err) => {
                    warn!(?key, %err, "loading object failed");
                    entries.entries.remove(&key);
                    Err(CacheError::LoadFailed(Arc::new(err)))
                }
            };

            // Sent while holding the lock, waiters observe the outcome and the entry together.
            // Nobody might be waiting anymore.
            let _ = tx.send(Some(outcome));
        });
    }

    /// Drop a reference which was taken with [`Handle::detach`].
    ///
    /// Only detached references can be released this way. Releasing a key without one does
    /// nothing and returns `false`, references of live handles are never touched.
    pub fn release(&self, key: &K) -> bool {
        self.shared.release_detached(key)
    }

    /// Close and evict all objects without references which were idle for longer than the
    /// configured time to live. Returns the number of evicted objects.
    pub fn gc(&self) -> Result<usize, CacheError<L::Error>> {
        let now = Instant::now();
        let evicted: Vec<(K, Arc<V>)> = {
            let mut entries = self.shared.lock()?;
            let idle: Vec<K> = entries
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.refs == 0
                        && matches!(entry.state, EntryState::Ready(_))
                        && now.duration_since(entry.last_used) >= self.config.ttl
                })
                .map(|(key, _)| key.clone())
                .collect();

            idle.into_iter()
                .filter_map(|key| match entries.entries.remove(&key) {
                    Some(Entry {
                        state: EntryState::Ready(object),
                        ..
                    }) => Some((key, object)),
                    _ => None,
                })
                .collect()
        };

        for (key, object) in &evicted {
            debug!(?key, "evict idle object");
            object.close();
        }

        Ok(evicted.len())
    }

    /// Run [`ObjectCache::gc`] periodically until the cache is closed.
    ///
    /// With a zero `gc_period` the task only waits for the cache to close.
    pub fn spawn_gc(&self) -> JoinHandle<()> {
        let cache = self.clone();
        let mut shutdown = self.shared.shutdown.subscribe();

        tokio::spawn(async move {
            if cache.config.gc_period.is_zero() {
                warn!("gc period is zero, periodic garbage collection is disabled");
                let _ = shutdown.wait_for(|closed| *closed).await;
                return;
            }

            let mut interval = tokio::time::interval(cache.config.gc_period);
            // First tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = cache.gc() {
                            warn!(%err, "garbage collection failed");
                            break;
                        }
                    }
                    _ = shutdown.wait_for(|closed| *closed) => break,
                }
            }
        })
    }

    /// Close and evict an object without references. Returns `false` if the key was not cached.
    pub fn remove(&self, key: &K) -> Result<bool, CacheError<L::Error>> {
        let object = {
            let mut entries = self.shared.lock()?;
            match entries.entries.get(key) {
                None => return Ok(false),
                Some(Entry {
                    state: EntryState::Loading(_),
                    ..
                }) => return Err(CacheError::Loading),
                Some(Entry { refs, .. }) if *refs > 0 => return Err(CacheError::InUse(*refs)),
                Some(_) => {}
            }

            match entries.entries.remove(key) {
                Some(Entry {
                    state: EntryState::Ready(object),
                    ..
                }) => object,
                _ => return Ok(false),
            }
        };

        debug!(?key, "remove object");
        object.close();
        Ok(true)
    }

    /// Number of cached objects, including the ones still loading.
    pub fn len(&self) -> usize {
        self.shared
            .lock()
            .map(|entries| entries.entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.shared
            .lock()
            .map(|entries| entries.entries.contains_key(key))
            .unwrap_or_default()
    }

    /// Number of references currently held for a key, including callers waiting for its load.
    pub fn refs(&self, key: &K) -> usize {
        self.shared
            .lock()
            .ok()
            .and_then(|entries| entries.entries.get(key).map(|entry| entry.refs))
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .lock()
            .map(|entries| entries.closed)
            .unwrap_or(true)
    }

    /// Refuse new requests, wait for loads in flight and close every object exactly once, no
    /// matter if it is still referenced. Closing again has no effect.
    pub async fn close(&self) -> Result<(), CacheError<L::Error>> {
        let loading: Vec<watch::Receiver<LoadOutcome<V, L::Error>>> = {
            let mut entries = self.shared.lock()?;
            if entries.closed {
                return Ok(());
            }
            entries.closed = true;

            entries
                .entries
                .values()
                .filter_map(|entry| match &entry.state {
                    EntryState::Loading(rx) => Some(rx.clone()),
                    EntryState::Ready(_) => None,
                })
                .collect()
        };

        debug!(loading = loading.len(), "close cache");
        for mut rx in loading {
            // Aborted loads are fine as well.
            let _ = rx.wait_for(|outcome| outcome.is_some()).await;
        }

        let objects: Vec<(K, Arc<V>)> = {
            let mut entries = self.shared.lock()?;
            entries
                .entries
                .drain()
                .filter_map(|(key, entry)| match entry.state {
                    EntryState::Ready(object) => Some((key, object)),
                    EntryState::Loading(_) => None,
                })
                .collect()
        };

        for (key, object) in objects {
            debug!(?key, "close object");
            object.close();
        }

        let _ = self.shared.shutdown.send(true);

        Ok(())
    }
}

impl<K, V, L> fmt::Debug for ObjectCache<K, V, L>
where
    L: Loader<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Reference to a cached object. Dropping the handle releases the reference exactly once.
pub struct Handle<K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    shared: Arc<Shared<K, V, E>>,
    key: K,
    object: Arc<V>,
    released: bool,
}

impl<K, V, E> Handle<K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    fn new(shared: Arc<Shared<K, V, E>>, key: K, object: Arc<V>) -> Self {
        Self {
            shared,
            key,
            object,
            released: false,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn object(&self) -> &Arc<V> {
        &self.object
    }

    /// Keep the reference without releasing it on drop. The caller has to call
    /// [`ObjectCache::release`] once it is done with the object.
    pub fn detach(mut self) -> Arc<V> {
        self.released = true;
        self.shared.detach(&self.key, &self.object);
        self.object.clone()
    }
}

impl<K, V, E> Deref for Handle<K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<K, V, E> Drop for Handle<K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.release_handle(&self.key, &self.object);
        }
    }
}

impl<K, V, E> fmt::Debug for Handle<K, V, E>
where
    K: Clone + Eq + StdHash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("key", &self.key).finish()
    }
}

#[derive(Debug, Error)]
pub enum CacheError<E> {
    #[error("cache is closed")]
    Closed,

    #[error("loading object failed: {0}")]
    LoadFailed(Arc<E>),

    #[error("loading object was aborted")]
    LoadAborted,

    #[error("object is still loading")]
    Loading,

    #[error("object is in use by {0} references")]
    InUse(usize),

    #[error("cache lock is poisoned")]
    LockPoisoned,
}

impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            CacheError::Closed => CacheError::Closed,
            CacheError::LoadFailed(err) => CacheError::LoadFailed(err.clone()),
            CacheError::LoadAborted => CacheError::LoadAborted,
            CacheError::Loading => CacheError::Loading,
            CacheError::InUse(refs) => CacheError::InUse(*refs),
            CacheError::LockPoisoned => CacheError::LockPoisoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use thiserror::Error;
    use tokio::task::JoinSet;
    use tokio::time::{Duration, sleep};

    use crate::config::CacheConfig;

    use super::{CacheError, Loader, Object, ObjectCache};

    #[derive(Debug)]
    struct TestObject {
        key: u64,
        closes: Arc<AtomicUsize>,
    }

    impl Object for TestObject {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Error)]
    #[error("no object for key {0}")]
    struct TestLoadError(u64);

    #[derive(Clone, Default)]
    struct TestLoader {
        loads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        failing: HashSet<u64>,
    }

    impl Loader<u64, TestObject> for TestLoader {
        type Error = TestLoadError;

        async fn load(&self, key: &u64) -> Result<TestObject, Self::Error> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(100)).await;

            if self.failing.contains(key) {
                return Err(TestLoadError(*key));
            }

            Ok(TestObject {
                key: *key,
                closes: self.closes.clone(),
            })
        }
    }

    fn cache(loader: &TestLoader) -> ObjectCache<u64, TestObject, TestLoader> {
        ObjectCache::new(
            loader.clone(),
            CacheConfig::new().ttl(Duration::from_secs(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_load() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        let mut tasks = JoinSet::new();
        for _ in 0..10 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.get(&7).await.map(|handle| handle.detach()) });
        }

        let mut objects = Vec::new();
        while let Some(result) = tasks.join_next().await {
            objects.push(result.unwrap().unwrap());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(objects.iter().all(|object| Arc::ptr_eq(object, &objects[0])));
        assert_eq!(objects[0].key, 7);
        assert_eq!(cache.refs(&7), 10);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reach_all_waiters() {
        let loader = TestLoader {
            failing: HashSet::from([3]),
            ..Default::default()
        };
        let cache = cache(&loader);

        let mut tasks = JoinSet::new();
        for _ in 0..5 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.get(&3).await.map(|handle| handle.detach()) });
        }

        while let Some(result) = tasks.join_next().await {
            assert!(matches!(
                result.unwrap(),
                Err(CacheError::LoadFailed(err)) if err.0 == 3
            ));
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&3));

        // The next request tries again.
        assert!(cache.get(&3).await.is_err());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_without_reference_is_ignored() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        // Never requested.
        assert!(!cache.release(&1));

        let object = cache.get(&1).await.unwrap().detach();
        assert_eq!(cache.refs(&1), 1);
        assert!(cache.release(&1));
        assert!(!cache.release(&1));
        assert_eq!(cache.refs(&1), 0);

        // Still cached and not closed.
        assert!(cache.contains(&1));
        assert_eq!(object.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handles_release_on_drop() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        let handle_1 = cache.get(&1).await.unwrap();
        let handle_2 = cache.get(&1).await.unwrap();
        assert_eq!(*handle_1.key(), 1);
        assert_eq!(handle_2.object().key, 1);
        assert_eq!(cache.refs(&1), 2);

        drop(handle_1);
        assert_eq!(cache.refs(&1), 1);
        drop(handle_2);
        assert_eq!(cache.refs(&1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_loads() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        let ready = cache.get(&1).await.unwrap();

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(&2).await.map(|handle| handle.detach()) })
        };

        // Let the second load start.
        sleep(Duration::from_millis(10)).await;
        assert!(cache.contains(&2));

        cache.close().await.unwrap();
        assert!(cache.is_closed());
        assert!(cache.is_empty());

        // Both objects were closed once, the referenced one included.
        assert_eq!(loader.closes.load(Ordering::SeqCst), 2);
        assert!(matches!(pending.await.unwrap(), Err(CacheError::Closed)));
        assert!(matches!(cache.get(&1).await, Err(CacheError::Closed)));

        // Dropping a handle after closing and closing again changes nothing.
        drop(ready);
        cache.close().await.unwrap();
        assert_eq!(loader.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gc_evicts_idle_objects() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        drop(cache.get(&1).await.unwrap());
        let held = cache.get(&2).await.unwrap();

        assert_eq!(cache.gc().unwrap(), 0);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.gc().unwrap(), 1);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert_eq!(loader.closes.load(Ordering::SeqCst), 1);

        // Evicted objects are loaded again on request.
        drop(cache.get(&1).await.unwrap());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 3);
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_gc() {
        let loader = TestLoader::default();
        let cache = ObjectCache::new(
            loader.clone(),
            CacheConfig::new()
                .ttl(Duration::from_secs(5))
                .gc_period(Duration::from_secs(1)),
        );
        let gc = cache.spawn_gc();

        drop(cache.get(&1).await.unwrap());
        sleep(Duration::from_secs(7)).await;
        assert!(!cache.contains(&1));
        assert_eq!(loader.closes.load(Ordering::SeqCst), 1);

        cache.close().await.unwrap();
        gc.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn remove_requires_no_references() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        let handle = cache.get(&1).await.unwrap();
        assert!(matches!(cache.remove(&1), Err(CacheError::InUse(1))));

        drop(handle);
        assert!(cache.remove(&1).unwrap());
        assert!(!cache.remove(&1).unwrap());
        assert_eq!(loader.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_release_keeps_objects_in_use() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        let handle = cache.get(&1).await.unwrap();

        // The reference of a live handle can not be released by key.
        assert!(!cache.release(&1));
        assert_eq!(cache.refs(&1), 1);
        assert!(matches!(cache.remove(&1), Err(CacheError::InUse(1))));

        sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.gc().unwrap(), 0);
        assert_eq!(loader.closes.load(Ordering::SeqCst), 0);

        // Detached references are given back by key, handles on drop.
        let detached = cache.get(&1).await.unwrap().detach();
        assert_eq!(cache.refs(&1), 2);
        assert!(cache.release(&1));
        assert!(!cache.release(&1));
        assert_eq!(cache.refs(&1), 1);

        drop(handle);
        assert_eq!(cache.refs(&1), 0);
        assert!(cache.remove(&1).unwrap());
        assert_eq!(detached.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gc_spares_objects_with_waiters() {
        let loader = TestLoader::default();
        let cache = ObjectCache::new(loader.clone(), CacheConfig::new().ttl(Duration::ZERO));

        let collector = {
            let cache = cache.clone();
            tokio::spawn(async move {
                while !cache.is_closed() {
                    cache.gc().unwrap();
                    sleep(Duration::from_millis(1)).await;
                }
            })
        };

        let mut tasks = JoinSet::new();
        for _ in 0..3 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.get(&1).await.map(|handle| handle.detach()) });
        }

        let mut objects = Vec::new();
        while let Some(result) = tasks.join_next().await {
            objects.push(result.unwrap().unwrap());
        }

        // Every waiter got the same object which was never evicted in between.
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.closes.load(Ordering::SeqCst), 0);
        assert!(objects.iter().all(|object| Arc::ptr_eq(object, &objects[0])));
        assert_eq!(cache.refs(&1), 3);

        for _ in 0..3 {
            assert!(cache.release(&1));
        }
        sleep(Duration::from_millis(5)).await;
        assert!(!cache.contains(&1));
        assert_eq!(loader.closes.load(Ordering::SeqCst), 1);

        cache.close().await.unwrap();
        collector.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_requests_give_back_their_reference() {
        let loader = TestLoader::default();
        let cache = cache(&loader);

        let request = tokio::time::timeout(Duration::from_millis(10), cache.get(&1)).await;
        assert!(request.is_err());
        assert_eq!(cache.refs(&1), 0);

        // The load carries on without anyone waiting.
        sleep(Duration::from_millis(200)).await;
        assert!(cache.contains(&1));
        assert_eq!(cache.refs(&1), 0);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.gc().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_gc_period_disables_collection() {
        let loader = TestLoader::default();
        let cache = ObjectCache::new(
            loader.clone(),
            CacheConfig::new()
                .ttl(Duration::ZERO)
                .gc_period(Duration::ZERO),
        );
        let gc = cache.spawn_gc();

        drop(cache.get(&1).await.unwrap());
        sleep(Duration::from_secs(1)).await;
        assert!(cache.contains(&1));

        cache.close().await.unwrap();
        gc.await.unwrap();
    }
}
