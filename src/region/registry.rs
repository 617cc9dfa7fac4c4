use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::handle::{RegionDescriptor, RegionHandle, WireKey, WireValue};
use super::loader::Loader;
use super::partitioner::Partitioner;
use super::store::{Region, RegionOptions};
use crate::error::CacheError;

/// Process-wide table of named regions.
///
/// Regions are created during startup; once the endpoint starts serving the
/// registry is sealed and only lookups remain. The table lock is held for
/// map access only, never while a region operation runs.
pub struct RegionRegistry {
  regions: RwLock<HashMap<String, Arc<dyn RegionHandle>>>,
  sealed: AtomicBool,
}

impl Default for RegionRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl RegionRegistry {
  pub fn new() -> Self {
    Self {
      regions: RwLock::new(HashMap::new()),
      sealed: AtomicBool::new(false),
    }
  }

  /// Create and register a region. Names are unique within the registry.
  pub fn create_region<K, V>(
    &self,
    options: RegionOptions,
    partitioner: Arc<dyn Partitioner<K>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
  ) -> Result<Arc<Region<K, V>>, CacheError>
  where
    K: WireKey,
    V: WireValue,
  {
    if self.is_sealed() {
      return Err(CacheError::RegistrySealed(options.name));
    }

    let mut regions = self.regions.write();
    if regions.contains_key(&options.name) {
      return Err(CacheError::DuplicateRegion(options.name));
    }

    let region = Arc::new(Region::new(options, partitioner, loader));
    regions.insert(
      region.name().to_string(),
      region.clone() as Arc<dyn RegionHandle>,
    );
    tracing::info!(
      "Region '{}' created: key={}, value={}, partitions={}, loader={}",
      region.name(),
      K::KIND,
      V::KIND,
      region.partition_count(),
      region.has_loader()
    );
    Ok(region)
  }

  pub fn get_region(&self, name: &str) -> Result<Arc<dyn RegionHandle>, CacheError> {
    self
      .regions
      .read()
      .get(name)
      .cloned()
      .ok_or_else(|| CacheError::RegionNotFound(name.to_string()))
  }

  pub fn contains(&self, name: &str) -> bool {
    self.regions.read().contains_key(name)
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.regions.read().keys().cloned().collect();
    names.sort();
    names
  }

  pub fn descriptors(&self) -> Vec<RegionDescriptor> {
    let mut descriptors: Vec<RegionDescriptor> = self
      .regions
      .read()
      .values()
      .map(|r| r.descriptor())
      .collect();
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));
    descriptors
  }

  pub fn len(&self) -> usize {
    self.regions.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Disallow further region creation.
  pub fn seal(&self) {
    self.sealed.store(true, Ordering::Release);
  }

  pub fn is_sealed(&self) -> bool {
    self.sealed.load(Ordering::Acquire)
  }

  /// Release every region and empty the table.
  pub fn close(&self) {
    let drained: Vec<Arc<dyn RegionHandle>> = {
      let mut regions = self.regions.write();
      regions.drain().map(|(_, r)| r).collect()
    };
    for region in &drained {
      region.close();
    }
    self.seal();
    if !drained.is_empty() {
      tracing::info!("Released {} region(s)", drained.len());
    }
  }
}
