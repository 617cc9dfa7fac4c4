//! Type-erased access to regions.
//!
//! Regions are generic over their key and value types; the registry and the
//! endpoint see them through [`RegionHandle`], which takes JSON operands and
//! decodes them against the region's declared types.

use std::fmt::Display;
use std::hash::Hash;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::{EvictionPolicy, Region, RegionStats};
use crate::error::CacheError;

/// Declared key or value type of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
  Integer,
  String,
}

impl std::str::FromStr for ValueKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "integer" | "int" | "long" => Ok(ValueKind::Integer),
      "string" | "str" => Ok(ValueKind::String),
      _ => Err(format!("Unknown value type: {}", s)),
    }
  }
}

impl std::fmt::Display for ValueKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ValueKind::Integer => write!(f, "integer"),
      ValueKind::String => write!(f, "string"),
    }
  }
}

/// Types usable as region values on the wire.
pub trait WireValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
  const KIND: ValueKind;
}

/// Types usable as region keys on the wire.
pub trait WireKey: WireValue + Hash + Eq + Display {}

impl WireValue for i64 {
  const KIND: ValueKind = ValueKind::Integer;
}
impl WireKey for i64 {}

impl WireValue for String {
  const KIND: ValueKind = ValueKind::String;
}
impl WireKey for String {}

/// Static description of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
  pub name: String,
  pub key_type: ValueKind,
  pub value_type: ValueKind,
  pub partitions: u32,
  pub has_loader: bool,
  pub eviction: EvictionPolicy,
}

#[async_trait]
pub trait RegionHandle: Send + Sync {
  fn name(&self) -> &str;
  fn descriptor(&self) -> RegionDescriptor;
  async fn get(&self, key: &Value) -> Result<Value, CacheError>;
  fn put(&self, key: &Value, value: &Value) -> Result<(), CacheError>;
  fn remove(&self, key: &Value) -> Result<bool, CacheError>;
  fn contains_key(&self, key: &Value) -> Result<bool, CacheError>;
  fn stats(&self) -> RegionStats;
  fn close(&self);
}

/// Decode a wire key. Null and mistyped keys are invalid keys.
pub fn decode_key<K: WireKey>(key: &Value) -> Result<K, CacheError> {
  if key.is_null() {
    return Err(CacheError::InvalidKey("key must not be null".into()));
  }
  serde_json::from_value(key.clone())
    .map_err(|_| CacheError::InvalidKey(format!("expected {} key, got {}", K::KIND, key)))
}

/// Decode a wire value against the region's declared value type.
pub fn decode_value<V: WireValue>(value: &Value) -> Result<V, CacheError> {
  serde_json::from_value(value.clone())
    .map_err(|_| CacheError::BadRequest(format!("expected {} value, got {}", V::KIND, value)))
}

fn encode_value<V: WireValue>(value: &V) -> Result<Value, CacheError> {
  serde_json::to_value(value)
    .map_err(|e| CacheError::BadRequest(format!("Serialization error: {}", e)))
}

#[async_trait]
impl<K, V> RegionHandle for Region<K, V>
where
  K: WireKey,
  V: WireValue,
{
  fn name(&self) -> &str {
    Region::name(self)
  }

  fn descriptor(&self) -> RegionDescriptor {
    RegionDescriptor {
      name: Region::name(self).to_string(),
      key_type: K::KIND,
      value_type: V::KIND,
      partitions: self.partition_count(),
      has_loader: self.has_loader(),
      eviction: self.eviction(),
    }
  }

  async fn get(&self, key: &Value) -> Result<Value, CacheError> {
    let key = decode_key::<K>(key)?;
    let value = Region::get(self, key).await?;
    encode_value(&value)
  }

  fn put(&self, key: &Value, value: &Value) -> Result<(), CacheError> {
    let key = decode_key::<K>(key)?;
    let value = decode_value::<V>(value)?;
    Region::put(self, key, value)
  }

  fn remove(&self, key: &Value) -> Result<bool, CacheError> {
    Region::remove(self, &decode_key::<K>(key)?)
  }

  fn contains_key(&self, key: &Value) -> Result<bool, CacheError> {
    Region::contains_key(self, &decode_key::<K>(key)?)
  }

  fn stats(&self) -> RegionStats {
    Region::stats(self)
  }

  fn close(&self) {
    Region::close(self)
  }
}
