// Server-side modules (only compiled with server feature)
#[cfg(feature = "server")]
pub mod client;
#[cfg(feature = "server")]
pub mod error;
#[cfg(feature = "server")]
pub mod region;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod types;

#[cfg(feature = "server")]
pub use error::CacheError;
