//! Partitioned region storage with load-on-miss.
//!
//! Each partition owns one lock guarding both its present entries and its
//! in-flight loads. A miss on a loader-backed region installs a shared
//! pending result for the key and spawns the load as a detached task; every
//! later `get` for that key awaits the same pending result until the task
//! resolves it. Locks are never held across an `.await` or across the
//! loader call, so keys only contend while their partition's maps are being
//! touched.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::loader::Loader;
use super::partitioner::Partitioner;
use crate::error::CacheError;

/// Partition count used when a region does not declare one.
pub const DEFAULT_PARTITIONS: u32 = 113;

/// Eviction policy declared for a region.
///
/// Only `none` exists today; entries live until removed or until the region
/// is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
  #[default]
  None,
}

impl std::str::FromStr for EvictionPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "none" => Ok(EvictionPolicy::None),
      _ => Err(format!("Unsupported eviction policy: {}", s)),
    }
  }
}

impl std::fmt::Display for EvictionPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EvictionPolicy::None => write!(f, "none"),
    }
  }
}

/// Creation-time settings for a region.
#[derive(Debug, Clone)]
pub struct RegionOptions {
  pub name: String,
  pub partitions: u32,
  pub eviction: EvictionPolicy,
}

impl RegionOptions {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      partitions: DEFAULT_PARTITIONS,
      eviction: EvictionPolicy::default(),
    }
  }

  pub fn partitions(mut self, partitions: u32) -> Self {
    self.partitions = partitions.max(1);
    self
  }

  pub fn eviction(mut self, eviction: EvictionPolicy) -> Self {
    self.eviction = eviction;
    self
  }
}

/// Region statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
  pub entries: usize,
  pub hits: u64,
  pub misses: u64,
  pub loads: u64,
  pub load_failures: u64,
}

type PendingLoad<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

struct PartitionState<K, V> {
  entries: HashMap<K, V>,
  loading: HashMap<K, PendingLoad<V>>,
}

struct Partition<K, V> {
  state: Mutex<PartitionState<K, V>>,
}

impl<K, V> Partition<K, V> {
  fn new() -> Self {
    Self {
      state: Mutex::new(PartitionState {
        entries: HashMap::new(),
        loading: HashMap::new(),
      }),
    }
  }
}

#[derive(Default)]
struct Counters {
  hits: AtomicU64,
  misses: AtomicU64,
  loads: AtomicU64,
  load_failures: AtomicU64,
}

/// A named, typed key/value container with load-on-miss.
///
/// `get` must be called from within a tokio runtime: loads run as spawned
/// tasks so they finish even if every caller waiting on them goes away.
pub struct Region<K, V> {
  name: String,
  eviction: EvictionPolicy,
  partitions: Vec<Arc<Partition<K, V>>>,
  partitioner: Arc<dyn Partitioner<K>>,
  loader: Option<Arc<dyn Loader<K, V>>>,
  counters: Arc<Counters>,
  closed: Arc<AtomicBool>,
}

impl<K, V> Region<K, V>
where
  K: Hash + Eq + Clone + Display + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  pub fn new(
    options: RegionOptions,
    partitioner: Arc<dyn Partitioner<K>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
  ) -> Self {
    let count = options.partitions.max(1);
    Self {
      name: options.name,
      eviction: options.eviction,
      partitions: (0..count).map(|_| Arc::new(Partition::new())).collect(),
      partitioner,
      loader,
      counters: Arc::new(Counters::default()),
      closed: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn partition_count(&self) -> u32 {
    self.partitions.len() as u32
  }

  pub fn eviction(&self) -> EvictionPolicy {
    self.eviction
  }

  pub fn has_loader(&self) -> bool {
    self.loader.is_some()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Partition index the key lives in.
  pub fn partition_of(&self, key: &K) -> u32 {
    let count = self.partition_count();
    self.partitioner.partition_of(key, count) % count
  }

  fn partition(&self, key: &K) -> &Arc<Partition<K, V>> {
    &self.partitions[self.partition_of(key) as usize]
  }

  fn ensure_open(&self) -> Result<(), CacheError> {
    if self.is_closed() {
      return Err(CacheError::RegionClosed(self.name.clone()));
    }
    Ok(())
  }

  fn validate(&self, key: &K) -> Result<(), CacheError> {
    if let Some(loader) = &self.loader {
      loader.validate(key)?;
    }
    Ok(())
  }

  /// Returns the value for `key`, loading it on a miss.
  ///
  /// Concurrent callers for a key that is already loading wait on the same
  /// load and all observe its outcome. A failed load leaves the key absent.
  pub async fn get(&self, key: K) -> Result<V, CacheError> {
    self.ensure_open()?;
    self.validate(&key)?;

    let partition = self.partition(&key);
    let pending = {
      let mut state = partition.state.lock();
      if let Some(value) = state.entries.get(&key) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(value.clone());
      }
      self.counters.misses.fetch_add(1, Ordering::Relaxed);

      let Some(loader) = &self.loader else {
        return Err(CacheError::KeyNotFound {
          region: self.name.clone(),
          key: key.to_string(),
        });
      };

      match state.loading.get(&key) {
        Some(pending) => {
          tracing::debug!(region = %self.name, key = %key, "Joining in-flight load");
          pending.clone()
        }
        None => {
          let pending = self.spawn_load(partition.clone(), key.clone(), loader.clone());
          state.loading.insert(key, pending.clone());
          pending
        }
      }
    };

    pending.await
  }

  /// Called with the partition lock held, so the load task cannot resolve
  /// before its pending entry is installed.
  fn spawn_load(
    &self,
    partition: Arc<Partition<K, V>>,
    key: K,
    loader: Arc<dyn Loader<K, V>>,
  ) -> PendingLoad<V> {
    let region = self.name.clone();
    let counters = self.counters.clone();
    let closed = self.closed.clone();
    counters.loads.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(region = %region, key = %key, "Starting load");

    let task = tokio::spawn(async move {
      let loader_key = key.clone();
      let outcome = match tokio::task::spawn_blocking(move || loader.load(&loader_key)).await {
        Ok(result) => result.map_err(CacheError::from),
        Err(e) => Err(CacheError::Load(format!("loader panicked: {}", e))),
      };

      {
        let mut state = partition.state.lock();
        state.loading.remove(&key);
        if let Ok(value) = &outcome {
          if !closed.load(Ordering::Acquire) {
            state.entries.insert(key.clone(), value.clone());
          }
        }
      }

      match &outcome {
        Ok(_) => tracing::debug!(region = %region, key = %key, "Load complete"),
        Err(e) => {
          counters.load_failures.fetch_add(1, Ordering::Relaxed);
          tracing::warn!(region = %region, key = %key, "Load failed: {}", e);
        }
      }
      outcome
    });

    async move {
      task
        .await
        .unwrap_or_else(|e| Err(CacheError::Load(format!("load task failed: {}", e))))
    }
    .boxed()
    .shared()
  }

  /// Stores `value` unconditionally without consulting the loader.
  ///
  /// If a load for the key is in flight, whichever of the two finishes last
  /// decides the stored value.
  pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
    self.ensure_open()?;
    self.validate(&key)?;
    self.partition(&key).state.lock().entries.insert(key, value);
    Ok(())
  }

  /// Removes a present entry. In-flight loads are not cancelled.
  pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
    self.ensure_open()?;
    Ok(self.partition(key).state.lock().entries.remove(key).is_some())
  }

  /// True iff the key is present. Never triggers a load.
  pub fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
    self.ensure_open()?;
    Ok(self.partition(key).state.lock().entries.contains_key(key))
  }

  pub fn is_loading(&self, key: &K) -> bool {
    self.partition(key).state.lock().loading.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self
      .partitions
      .iter()
      .map(|p| p.state.lock().entries.len())
      .sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> RegionStats {
    RegionStats {
      entries: self.len(),
      hits: self.counters.hits.load(Ordering::Relaxed),
      misses: self.counters.misses.load(Ordering::Relaxed),
      loads: self.counters.loads.load(Ordering::Relaxed),
      load_failures: self.counters.load_failures.load(Ordering::Relaxed),
    }
  }

  /// Releases every entry. Later operations fail with `RegionClosed`;
  /// loads still in flight resolve their waiters but store nothing.
  pub fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let stats = self.stats();
    for partition in &self.partitions {
      let mut state = partition.state.lock();
      state.entries.clear();
      state.loading.clear();
    }
    tracing::info!(
      "Region '{}' released: entries={}, hits={}, misses={}, loads={}, load_failures={}",
      self.name,
      stats.entries,
      stats.hits,
      stats.misses,
      stats.loads,
      stats.load_failures
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::loader::{FactorialLoader, LoadError};
  use crate::region::partitioner::HashPartitioner;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  fn counting_loader(
    calls: Arc<AtomicUsize>,
    delay: Duration,
  ) -> Arc<dyn Loader<i64, i64>> {
    Arc::new(move |key: &i64| -> Result<i64, LoadError> {
      calls.fetch_add(1, Ordering::SeqCst);
      std::thread::sleep(delay);
      Ok(key * 10)
    })
  }

  fn region_with(loader: Option<Arc<dyn Loader<i64, i64>>>) -> Arc<Region<i64, i64>> {
    Arc::new(Region::new(
      RegionOptions::new("test").partitions(4),
      Arc::new(HashPartitioner),
      loader,
    ))
  }

  #[tokio::test]
  async fn test_get_loads_on_miss() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(calls.clone(), Duration::ZERO)));

    assert_eq!(region.get(4).await, Ok(40));
    assert_eq!(region.get(4).await, Ok(40));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(region.contains_key(&4).unwrap());

    let stats = region.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
  }

  #[tokio::test]
  async fn test_put_then_get_skips_loader() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(calls.clone(), Duration::ZERO)));

    region.put(9, 1234).unwrap();
    assert_eq!(region.get(9).await, Ok(1234));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_remove_retriggers_loader() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(calls.clone(), Duration::ZERO)));

    assert_eq!(region.get(2).await, Ok(20));
    assert!(region.remove(&2).unwrap());
    assert!(!region.contains_key(&2).unwrap());
    assert_eq!(region.get(2).await, Ok(20));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(!region.remove(&77).unwrap());
  }

  #[tokio::test]
  async fn test_contains_key_never_loads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(calls.clone(), Duration::ZERO)));

    assert!(!region.contains_key(&5).unwrap());
    assert!(!region.is_loading(&5));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_gets_share_one_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(
      calls.clone(),
      Duration::from_millis(100),
    )));

    let mut handles = Vec::new();
    for _ in 0..32 {
      let region = region.clone();
      handles.push(tokio::spawn(async move { region.get(7).await }));
    }
    for handle in handles {
      assert_eq!(handle.await.unwrap(), Ok(70));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(region.stats().loads, 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_failed_load_reaches_every_waiter() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let loader: Arc<dyn Loader<i64, i64>> = Arc::new(move |_key: &i64| -> Result<i64, LoadError> {
      counter.fetch_add(1, Ordering::SeqCst);
      std::thread::sleep(Duration::from_millis(100));
      Err(LoadError::Failed("backend unavailable".into()))
    });
    let region = region_with(Some(loader));

    let mut handles = Vec::new();
    for _ in 0..8 {
      let region = region.clone();
      handles.push(tokio::spawn(async move { region.get(3).await }));
    }
    for handle in handles {
      assert_eq!(
        handle.await.unwrap(),
        Err(CacheError::Load("backend unavailable".into()))
      );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!region.contains_key(&3).unwrap());
    assert!(!region.is_loading(&3));

    // The next get retries.
    assert!(region.get(3).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(region.stats().load_failures, 2);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_slow_key_does_not_block_other_keys() {
    let loader: Arc<dyn Loader<i64, i64>> = Arc::new(|key: &i64| -> Result<i64, LoadError> {
      if *key == 1 {
        std::thread::sleep(Duration::from_millis(800));
      }
      Ok(*key)
    });
    // Single partition: both keys share a lock.
    let region: Arc<Region<i64, i64>> = Arc::new(Region::new(
      RegionOptions::new("slow").partitions(1),
      Arc::new(HashPartitioner),
      Some(loader),
    ));

    let slow = {
      let region = region.clone();
      tokio::spawn(async move { region.get(1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(region.is_loading(&1));

    let fast = tokio::time::timeout(Duration::from_millis(300), region.get(2)).await;
    assert_eq!(fast.expect("get(2) blocked behind get(1)"), Ok(2));
    assert_eq!(slow.await.unwrap(), Ok(1));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_abandoned_leader_does_not_cancel_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(
      calls.clone(),
      Duration::from_millis(200),
    )));

    let leader = {
      let region = region.clone();
      tokio::spawn(async move { region.get(6).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    leader.abort();
    assert!(region.is_loading(&6));

    assert_eq!(region.get(6).await, Ok(60));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_put_during_load_last_completion_wins() {
    let calls = Arc::new(AtomicUsize::new(0));
    let region = region_with(Some(counting_loader(
      calls.clone(),
      Duration::from_millis(200),
    )));

    let waiter = {
      let region = region.clone();
      tokio::spawn(async move { region.get(8).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    region.put(8, 999).unwrap();
    assert_eq!(region.get(8).await, Ok(999));

    assert_eq!(waiter.await.unwrap(), Ok(80));
    assert_eq!(region.get(8).await, Ok(80));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalid_key_rejected_before_load() {
    let region: Region<i64, i64> = Region::new(
      RegionOptions::new("Factorials"),
      Arc::new(HashPartitioner),
      Some(Arc::new(FactorialLoader)),
    );

    assert!(matches!(region.get(-3).await, Err(CacheError::InvalidKey(_))));
    assert!(matches!(region.put(-3, 1), Err(CacheError::InvalidKey(_))));
    assert!(!region.contains_key(&-3).unwrap());
    assert_eq!(region.stats().loads, 0);

    assert_eq!(region.get(5).await, Ok(120));
    assert_eq!(region.get(0).await, Ok(1));
    assert_eq!(region.get(1).await, Ok(1));
  }

  #[tokio::test]
  async fn test_factorial_overflow_is_load_error() {
    let region: Region<i64, i64> = Region::new(
      RegionOptions::new("Factorials"),
      Arc::new(HashPartitioner),
      Some(Arc::new(FactorialLoader)),
    );

    assert!(matches!(region.get(21).await, Err(CacheError::Load(_))));
    assert!(!region.contains_key(&21).unwrap());
  }

  #[tokio::test]
  async fn test_region_without_loader() {
    let region = region_with(None);

    assert_eq!(
      region.get(1).await,
      Err(CacheError::KeyNotFound {
        region: "test".into(),
        key: "1".into()
      })
    );
    region.put(1, 11).unwrap();
    assert_eq!(region.get(1).await, Ok(11));
  }

  #[tokio::test]
  async fn test_close_releases_entries() {
    let region = region_with(None);
    region.put(1, 1).unwrap();
    region.put(2, 2).unwrap();
    assert_eq!(region.len(), 2);

    region.close();
    assert!(region.is_closed());
    assert_eq!(region.len(), 0);
    assert_eq!(
      region.get(1).await,
      Err(CacheError::RegionClosed("test".into()))
    );
    assert!(region.put(3, 3).is_err());
    assert!(region.remove(&1).is_err());
  }

  #[test]
  fn test_partition_index_in_range() {
    let region = region_with(None);
    for key in -100..100 {
      assert!(region.partition_of(&key) < region.partition_count());
    }
  }

  #[test]
  fn test_eviction_policy_parse() {
    assert_eq!("none".parse::<EvictionPolicy>(), Ok(EvictionPolicy::None));
    assert!("lru".parse::<EvictionPolicy>().is_err());
    assert_eq!(EvictionPolicy::None.to_string(), "none");
  }
}
