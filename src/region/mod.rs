//! Partitioned key/value regions with load-on-miss.
//!
//! - `partitioner`: maps keys to partitions
//! - `loader`: computations invoked on a miss, including the factorial loader
//! - `store`: the typed `Region` and its single-flight load coordination
//! - `handle`: type-erased access used by the registry and the endpoint
//! - `registry`: process-wide table of named regions
//! - `catalog`: named loaders and region construction from declarations

pub mod catalog;
pub mod handle;
pub mod loader;
pub mod partitioner;
pub mod registry;
pub mod store;

pub use catalog::{LoaderCatalog, RegionDefinition};
pub use handle::{RegionDescriptor, RegionHandle, ValueKind, WireKey, WireValue};
pub use loader::{factorial, FactorialLoader, LoadError, Loader, MAX_FACTORIAL_INPUT};
pub use partitioner::{HashPartitioner, Partitioner};
pub use registry::RegionRegistry;
pub use store::{EvictionPolicy, Region, RegionOptions, RegionStats, DEFAULT_PARTITIONS};
