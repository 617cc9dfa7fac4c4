//! Error taxonomy shared by regions, the registry and the endpoint.

use crate::types::Status;

/// Errors raised by region operations, registry management and startup.
///
/// `Clone` is required: a single load outcome is handed to every caller
/// waiting on the same key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("load failed: {0}")]
  Load(String),

  #[error("region '{0}' not found")]
  RegionNotFound(String),

  #[error("key {key} not found in region '{region}'")]
  KeyNotFound { region: String, key: String },

  #[error("region '{0}' already exists")]
  DuplicateRegion(String),

  #[error("failed to bind {addr}: {reason}")]
  Bind { addr: String, reason: String },

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("registry is sealed, cannot create region '{0}'")]
  RegistrySealed(String),

  #[error("region '{0}' is closed")]
  RegionClosed(String),
}

impl CacheError {
  /// Wire status reported to clients for this error.
  pub fn status(&self) -> Status {
    match self {
      Self::InvalidKey(_) => Status::InvalidKey,
      Self::Load(_) => Status::LoadError,
      Self::RegionNotFound(_) | Self::KeyNotFound { .. } | Self::RegionClosed(_) => {
        Status::NotFound
      }
      Self::DuplicateRegion(_) => Status::DuplicateRegion,
      Self::Bind { .. } => Status::BindError,
      Self::BadRequest(_) | Self::Config(_) | Self::RegistrySealed(_) => Status::BadRequest,
    }
  }
}
