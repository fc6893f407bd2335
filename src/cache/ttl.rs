// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory TTL cache with bounded size and pluggable eviction.
//!
//! Entries expire individually; a background reaper pair sweeps them out.
//! The scanner walks the insertion-ordered key queue under the read lock
//! and hands expired keys to the worker over a bounded channel; the worker
//! evicts under the write lock and runs the user callback behind a panic
//! barrier. Insertion order approximates expiration order as long as the
//! default TTL is uniform, so the scanner stops at the first live head.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::queue::Queue;
use crate::error::Error;

const MIN_TTL: Duration = Duration::from_secs(60);
const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_REAPER_INTERVAL: Duration = Duration::from_secs(30);
const MAX_REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Eviction callback, invoked with the removed pair. Failures inside user
/// code are trapped and logged, never propagated.
pub type EvictFn<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

pub struct CacheConfig {
    default_ttl: Duration,
    max_entries: Option<usize>,
    allow_replace: bool,
    allow_eviction: bool,
    touch_on_hit: bool,
    reaper_interval: Duration,
    reaper_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30 * 60),
            max_entries: None,
            allow_replace: false,
            allow_eviction: true,
            touch_on_hit: true,
            reaper_interval: Duration::from_secs(5 * 60),
            reaper_buffer_size: 100,
        }
    }
}

pub type CacheOption = Box<dyn FnOnce(&mut CacheConfig)>;

/// TTL applied by `add`; clamped to `[1 min, 24 h]`.
pub fn option_default_ttl(ttl: Duration) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| c.default_ttl = clamp_ttl(ttl))
}

/// Upper bound on entries; at least 1.
pub fn option_max_entries(max: usize) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| c.max_entries = Some(max.max(1)))
}

/// Replace the value when `add` hits an existing key instead of failing.
pub fn option_allow_replace(allow: bool) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| c.allow_replace = allow)
}

/// Evict the oldest key when `add` finds the cache full instead of failing.
pub fn option_allow_eviction(allow: bool) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| c.allow_eviction = allow)
}

/// `get` re-enqueues the key and resets its expiration.
pub fn option_touch_on_hit(touch: bool) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| c.touch_on_hit = touch)
}

/// Background sweep period; clamped to `[30 s, 1 h]`.
pub fn option_reaper_interval(interval: Duration) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| {
        c.reaper_interval = interval.clamp(MIN_REAPER_INTERVAL, MAX_REAPER_INTERVAL);
    })
}

/// Channel depth between the reaper scanner and worker; at least 1.
pub fn option_reaper_buffer_size(size: usize) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| c.reaper_buffer_size = size.max(1))
}

/// Bypasses the TTL and reaper clamps so tests can run sweeps at
/// subsecond speed.
#[cfg(test)]
pub(crate) fn option_raw_timers(ttl: Duration, reaper_interval: Duration) -> CacheOption {
    Box::new(move |c: &mut CacheConfig| {
        c.default_ttl = ttl;
        c.reaper_interval = reaper_interval;
    })
}

fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_TTL, MAX_TTL)
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheInner<K, V> {
    items: RwLock<HashMap<K, CacheEntry<V>>>,
    keys: Queue<K>,
    evict_fn: Option<EvictFn<K, V>>,
    config: CacheConfig,
}

/// Generic `K → V` mapping with per-entry expiration.
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

enum ReapStep {
    /// An expired head was handed to the worker; keep scanning.
    Sent,
    /// The channel is full; retry on the next tick.
    Full,
    /// The head is live or the queue is empty.
    Done,
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + PartialEq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cancel: CancellationToken, options: Vec<CacheOption>) -> Self {
        Self::with_eviction(cancel, None, options)
    }

    pub fn with_eviction(
        cancel: CancellationToken,
        evict_fn: Option<EvictFn<K, V>>,
        options: Vec<CacheOption>,
    ) -> Self {
        let mut config = CacheConfig::default();
        for option in options {
            option(&mut config);
        }
        let reaper_buffer_size = config.reaper_buffer_size;
        let reaper_interval = config.reaper_interval;
        let inner = Arc::new(CacheInner {
            items: RwLock::new(HashMap::new()),
            keys: Queue::default(),
            evict_fn,
            config,
        });
        let cancel = cancel.child_token();

        let (reap_tx, reap_rx) = mpsc::channel(reaper_buffer_size);
        let scanner = tokio::spawn(Self::scanner(
            Arc::clone(&inner),
            reap_tx,
            reaper_interval,
            cancel.clone(),
        ));
        let worker = tokio::spawn(Self::worker(Arc::clone(&inner), reap_rx, cancel.clone()));

        Self {
            inner,
            cancel,
            tasks: Mutex::new(vec![scanner, worker]),
        }
    }

    /// Insert under the default TTL. Fails with [`Error::KeyExists`] when
    /// the key is present and replacement is off, or with
    /// [`Error::CapacityExceeded`] when full and eviction is off.
    pub fn add(&self, key: K, value: V) -> crate::error::Result<()> {
        self.add_raw(key, value, self.inner.config.default_ttl)
    }

    /// Insert under an explicit TTL, clamped to `[1 min, 24 h]`.
    pub fn add_with_ttl(&self, key: K, value: V, ttl: Duration) -> crate::error::Result<()> {
        self.add_raw(key, value, clamp_ttl(ttl))
    }

    fn add_raw(&self, key: K, value: V, ttl: Duration) -> crate::error::Result<()> {
        let inner = &self.inner;
        let mut items = inner.items.write().unwrap();
        if items.contains_key(&key) {
            if !inner.config.allow_replace {
                return Err(Error::KeyExists);
            }
            inner.keys.remove(&key);
        } else if inner.config.max_entries == Some(items.len()) {
            if !inner.config.allow_eviction {
                return Err(Error::CapacityExceeded);
            }
            if let Some(oldest) = inner.keys.pop() {
                inner.evict(&mut items, oldest);
            }
        }
        items.insert(
            key.clone(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.keys.push(key);
        Ok(())
    }

    /// Look up a key. A miss is not an error. Under `touch_on_hit` this is
    /// a writer region: it re-enqueues the key and resets its expiration.
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = &self.inner;
        if !inner.config.touch_on_hit {
            let items = inner.items.read().unwrap();
            return items.get(key).map(|entry| entry.value.clone());
        }
        let mut items = inner.items.write().unwrap();
        let entry = items.get_mut(key)?;
        inner.keys.remove(key);
        inner.keys.push(key.clone());
        entry.expires_at = Instant::now() + inner.config.default_ttl;
        Some(entry.value.clone())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let inner = &self.inner;
        let mut items = inner.items.write().unwrap();
        let entry = items.remove(key)?;
        inner.keys.remove(key);
        Some(entry.value)
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.inner.items.read().unwrap().contains_key(key)
    }

    pub fn entries(&self) -> usize {
        self.inner.items.read().unwrap().len()
    }

    /// Cancel the reaper pair and wait for both tasks to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("cache task exited abnormally: {err}");
                }
            }
        }
    }

    async fn scanner(
        inner: Arc<CacheInner<K, V>>,
        reap_tx: mpsc::Sender<K>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => loop {
                    match inner.reap(&reap_tx) {
                        ReapStep::Sent => tokio::task::yield_now().await,
                        ReapStep::Full | ReapStep::Done => break,
                    }
                },
            }
        }
    }

    async fn worker(
        inner: Arc<CacheInner<K, V>>,
        mut reap_rx: mpsc::Receiver<K>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                key = reap_rx.recv() => match key {
                    Some(key) => {
                        let mut items = inner.items.write().unwrap();
                        inner.evict(&mut items, key);
                    }
                    None => return,
                },
            }
        }
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Clone + Eq + Hash + PartialEq,
{
    /// Remove `key` from the map and run the eviction callback behind a
    /// panic barrier. The caller has already dequeued the key and holds
    /// the write lock.
    fn evict(&self, items: &mut HashMap<K, CacheEntry<V>>, key: K) {
        let Some(entry) = items.remove(&key) else {
            return;
        };
        if let Some(evict_fn) = &self.evict_fn {
            if catch_unwind(AssertUnwindSafe(|| evict_fn(key, entry.value))).is_err() {
                error!("recovered from panic in cache eviction callback");
            }
        }
    }

    /// One scanner step: examine the oldest key and, if expired, hand it
    /// to the worker. Reserves channel space before dequeueing so a full
    /// channel never loses the key.
    fn reap(&self, reap_tx: &mpsc::Sender<K>) -> ReapStep {
        let items = self.items.read().unwrap();
        let Some(head) = self.keys.items().into_iter().next() else {
            return ReapStep::Done;
        };
        let expired = items
            .get(&head)
            .map(|entry| entry.expires_at <= Instant::now())
            // A queued key without a map entry is stale; drop it below.
            .unwrap_or(true);
        if !expired {
            return ReapStep::Done;
        }
        match reap_tx.try_reserve() {
            Ok(permit) => {
                self.keys.pop();
                if items.contains_key(&head) {
                    permit.send(head);
                }
                ReapStep::Sent
            }
            Err(_) => ReapStep::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_default_config() {
        let cache: Cache<String, i32> = Cache::new(token(), Vec::new());
        let config = &cache.inner.config;
        assert_eq!(config.default_ttl, Duration::from_secs(1800));
        assert_eq!(config.max_entries, None);
        assert!(config.touch_on_hit);
        assert_eq!(config.reaper_interval, Duration::from_secs(300));
        assert!(config.allow_eviction);
        assert!(!config.allow_replace);
        assert_eq!(config.reaper_buffer_size, 100);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_option_clamps() {
        let cache: Cache<String, i32> = Cache::new(
            token(),
            vec![
                option_default_ttl(Duration::from_millis(30)),
                option_max_entries(0),
                option_reaper_interval(Duration::from_secs(1)),
                option_reaper_buffer_size(0),
            ],
        );
        let config = &cache.inner.config;
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.max_entries, Some(1));
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
        assert_eq!(config.reaper_buffer_size, 1);
        cache.close().await;

        let cache: Cache<String, i32> = Cache::new(
            token(),
            vec![
                option_default_ttl(Duration::from_secs(48 * 3600)),
                option_reaper_interval(Duration::from_secs(7201)),
            ],
        );
        let config = &cache.inner.config;
        assert_eq!(config.default_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.reaper_interval, Duration::from_secs(3600));
        cache.close().await;
    }

    #[tokio::test]
    async fn test_happy_path_eviction() {
        let evicted = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&evicted);
        let cache: Cache<&str, i32> = Cache::with_eviction(
            token(),
            Some(Box::new(move |key, _value| {
                seen.store(key == "A", Ordering::SeqCst);
            })),
            vec![option_max_entries(2)],
        );

        assert!(!cache.has_key(&"A"));
        assert!(cache.add("A", 1).is_ok());
        assert!(cache.has_key(&"A"));
        assert!(matches!(cache.add("A", 1), Err(Error::KeyExists)));
        assert!(cache.add("B", 2).is_ok());
        assert!(!evicted.load(Ordering::SeqCst));
        assert!(cache.add("C", 3).is_ok());
        assert!(evicted.load(Ordering::SeqCst));
        assert_eq!(cache.entries(), 2);

        assert_eq!(cache.get(&"A"), None);
        assert_eq!(cache.get(&"B"), Some(2));
        assert_eq!(cache.get(&"C"), Some(3));

        assert_eq!(cache.remove(&"A"), None);
        assert_eq!(cache.remove(&"B"), Some(2));
        assert_eq!(cache.remove(&"C"), Some(3));
        assert_eq!(cache.entries(), 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_replace_without_eviction() {
        let evicted = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&evicted);
        let cache: Cache<&str, i32> = Cache::with_eviction(
            token(),
            Some(Box::new(move |_key, _value| {
                seen.store(true, Ordering::SeqCst);
            })),
            vec![
                option_max_entries(2),
                option_allow_replace(true),
                option_allow_eviction(false),
                option_touch_on_hit(false),
            ],
        );

        assert!(cache.add("A", 1).is_ok());
        assert!(cache.add("A", 11).is_ok());
        assert!(cache.add("B", 2).is_ok());
        assert!(matches!(cache.add("C", 3), Err(Error::CapacityExceeded)));
        assert!(!evicted.load(Ordering::SeqCst));
        assert_eq!(cache.entries(), 2);

        assert_eq!(cache.get(&"A"), Some(11));
        assert_eq!(cache.remove(&"A"), Some(11));
        assert_eq!(cache.remove(&"B"), Some(2));
        assert_eq!(cache.remove(&"C"), None);
        assert_eq!(cache.entries(), 0);
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_eviction_order() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let cache: Cache<String, i32> = Cache::with_eviction(
            token(),
            Some(Box::new(move |key, _value| {
                seen.lock().unwrap().push(key);
            })),
            vec![
                option_touch_on_hit(true),
                option_reaper_buffer_size(1),
                option_raw_timers(Duration::from_secs(2), Duration::from_millis(100)),
            ],
        );

        cache.add("A".to_string(), 1).unwrap();
        cache.add("B".to_string(), 2).unwrap();
        cache.add("C".to_string(), 3).unwrap();
        cache.add("D".to_string(), 4).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"A".to_string()), Some(1));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["B", "C", "D", "A"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(cache.entries(), 0);
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_callback_panic_is_trapped() {
        let cache: Cache<String, i32> = Cache::with_eviction(
            token(),
            Some(Box::new(|_key, _value| panic!("client induced"))),
            vec![option_raw_timers(
                Duration::from_millis(100),
                Duration::from_millis(50),
            )],
        );
        cache.add("A".to_string(), 1).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        // The entry is gone and the reaper pair survived the panic.
        assert_eq!(cache.entries(), 0);
        cache.add("B".to_string(), 2).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.entries(), 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_tasks() {
        let cache: Cache<String, i32> = Cache::new(token(), Vec::new());
        cache.add("A".to_string(), 1).unwrap();
        cache.close().await;
        assert!(cache.tasks.lock().unwrap().is_empty());
    }
}
