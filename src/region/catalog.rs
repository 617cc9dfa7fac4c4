//! Named loaders and region construction from declarations.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::handle::{RegionHandle, ValueKind, WireKey, WireValue};
use super::loader::{FactorialLoader, Loader};
use super::partitioner::HashPartitioner;
use super::registry::RegionRegistry;
use super::store::{EvictionPolicy, RegionOptions, DEFAULT_PARTITIONS};
use crate::error::CacheError;

/// Declaration of a region, as found in the server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDefinition {
  pub name: String,
  #[serde(default = "default_kind")]
  pub key_type: ValueKind,
  #[serde(default = "default_kind")]
  pub value_type: ValueKind,
  #[serde(default = "default_partitions")]
  pub partitions: u32,
  /// Identifier of a loader registered in the catalog.
  #[serde(default)]
  pub loader: Option<String>,
  #[serde(default)]
  pub eviction: EvictionPolicy,
}

fn default_kind() -> ValueKind {
  ValueKind::Integer
}

fn default_partitions() -> u32 {
  DEFAULT_PARTITIONS
}

impl RegionDefinition {
  pub fn new(name: impl Into<String>, key_type: ValueKind, value_type: ValueKind) -> Self {
    Self {
      name: name.into(),
      key_type,
      value_type,
      partitions: DEFAULT_PARTITIONS,
      loader: None,
      eviction: EvictionPolicy::default(),
    }
  }

  pub fn with_loader(mut self, loader: impl Into<String>) -> Self {
    self.loader = Some(loader.into());
    self
  }

  pub fn with_partitions(mut self, partitions: u32) -> Self {
    self.partitions = partitions;
    self
  }

  /// The `Factorials` region: integer keys, factorial values.
  pub fn factorials() -> Self {
    Self::new("Factorials", ValueKind::Integer, ValueKind::Integer).with_loader("factorial")
  }

  fn options(&self) -> RegionOptions {
    RegionOptions::new(&self.name)
      .partitions(self.partitions)
      .eviction(self.eviction)
  }
}

type RegionBuilder =
  Box<dyn Fn(&RegionRegistry, &RegionDefinition) -> Result<Arc<dyn RegionHandle>, CacheError> + Send + Sync>;

struct CatalogEntry {
  key_type: ValueKind,
  value_type: ValueKind,
  build: RegionBuilder,
}

/// Registry of named loaders available to region declarations.
#[derive(Default)]
pub struct LoaderCatalog {
  entries: HashMap<String, CatalogEntry>,
}

impl LoaderCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Catalog with the loaders shipped in this crate.
  pub fn builtin() -> Self {
    let mut catalog = Self::new();
    catalog.register::<i64, i64, _>("factorial", FactorialLoader);
    catalog
  }

  /// Register `loader` under `id`, replacing any previous registration.
  pub fn register<K, V, L>(&mut self, id: impl Into<String>, loader: L)
  where
    K: WireKey,
    V: WireValue,
    L: Loader<K, V> + 'static,
  {
    let loader: Arc<dyn Loader<K, V>> = Arc::new(loader);
    let build: RegionBuilder = Box::new(
      move |registry: &RegionRegistry,
            definition: &RegionDefinition|
            -> Result<Arc<dyn RegionHandle>, CacheError> {
        let region = registry.create_region::<K, V>(
          definition.options(),
          Arc::new(HashPartitioner),
          Some(loader.clone()),
        )?;
        Ok(region as Arc<dyn RegionHandle>)
      },
    );
    self.entries.insert(
      id.into(),
      CatalogEntry {
        key_type: K::KIND,
        value_type: V::KIND,
        build,
      },
    );
  }

  pub fn contains(&self, id: &str) -> bool {
    self.entries.contains_key(id)
  }

  pub fn ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.entries.keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Create the declared region in `registry`.
  pub fn create_region(
    &self,
    registry: &RegionRegistry,
    definition: &RegionDefinition,
  ) -> Result<Arc<dyn RegionHandle>, CacheError> {
    let Some(id) = &definition.loader else {
      return create_plain(registry, definition);
    };

    let entry = self.entries.get(id).ok_or_else(|| {
      CacheError::Config(format!(
        "region '{}' references unknown loader '{}' (known: {})",
        definition.name,
        id,
        self.ids().join(", ")
      ))
    })?;

    if entry.key_type != definition.key_type || entry.value_type != definition.value_type {
      return Err(CacheError::Config(format!(
        "region '{}' declares {}/{} but loader '{}' produces {}/{}",
        definition.name,
        definition.key_type,
        definition.value_type,
        id,
        entry.key_type,
        entry.value_type
      )));
    }

    (entry.build)(registry, definition)
  }
}

fn create_plain(
  registry: &RegionRegistry,
  definition: &RegionDefinition,
) -> Result<Arc<dyn RegionHandle>, CacheError> {
  fn build<K: WireKey, V: WireValue>(
    registry: &RegionRegistry,
    definition: &RegionDefinition,
  ) -> Result<Arc<dyn RegionHandle>, CacheError> {
    let region =
      registry.create_region::<K, V>(definition.options(), Arc::new(HashPartitioner), None)?;
    Ok(region as Arc<dyn RegionHandle>)
  }

  match (definition.key_type, definition.value_type) {
    (ValueKind::Integer, ValueKind::Integer) => build::<i64, i64>(registry, definition),
    (ValueKind::Integer, ValueKind::String) => build::<i64, String>(registry, definition),
    (ValueKind::String, ValueKind::Integer) => build::<String, i64>(registry, definition),
    (ValueKind::String, ValueKind::String) => build::<String, String>(registry, definition),
  }
}
