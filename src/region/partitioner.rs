use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Places a key in one of a region's partitions.
///
/// Implementations must be pure: the same key and partition count always
/// yield the same index in `[0, partition_count)`.
pub trait Partitioner<K: ?Sized>: Send + Sync {
  fn partition_of(&self, key: &K, partition_count: u32) -> u32;
}

/// Hash-modulo placement using the std SipHash hasher with fixed keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl<K: Hash + ?Sized> Partitioner<K> for HashPartitioner {
  fn partition_of(&self, key: &K, partition_count: u32) -> u32 {
    if partition_count <= 1 {
      return 0;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partition_count as u64) as u32
  }
}
