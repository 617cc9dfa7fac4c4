//! Cache loaders: computations that populate a region on a miss.

use crate::error::CacheError;

/// Failure reported by a loader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
  #[error("{0}")]
  InvalidKey(String),
  #[error("{0}")]
  Failed(String),
}

impl From<LoadError> for CacheError {
  fn from(err: LoadError) -> Self {
    match err {
      LoadError::InvalidKey(msg) => CacheError::InvalidKey(msg),
      LoadError::Failed(msg) => CacheError::Load(msg),
    }
  }
}

/// Computes the value for a key that is absent from a region.
///
/// `load` runs on the blocking pool and is invoked at most once at a time
/// per key. `validate` is the region's key constraint and is checked before
/// any load starts.
pub trait Loader<K, V>: Send + Sync {
  fn validate(&self, _key: &K) -> Result<(), LoadError> {
    Ok(())
  }

  fn load(&self, key: &K) -> Result<V, LoadError>;
}

impl<K, V, F> Loader<K, V> for F
where
  F: Fn(&K) -> Result<V, LoadError> + Send + Sync,
{
  fn load(&self, key: &K) -> Result<V, LoadError> {
    self(key)
  }
}

/// Largest input whose factorial fits in an `i64`.
pub const MAX_FACTORIAL_INPUT: i64 = 20;

/// Factorial over 64-bit signed integers.
///
/// Negative inputs are rejected. Results that do not fit in an `i64`
/// (any input above [`MAX_FACTORIAL_INPUT`]) fail instead of wrapping.
pub fn factorial(number: i64) -> Result<i64, LoadError> {
  if number < 0 {
    return Err(LoadError::InvalidKey(format!(
      "number [{}] must be greater than or equal to 0",
      number
    )));
  }

  if number <= 2 {
    return Ok(if number < 2 { 1 } else { 2 });
  }

  let mut result = number;
  let mut factor = number - 1;
  while factor >= 2 {
    result = result.checked_mul(factor).ok_or_else(|| {
      LoadError::Failed(format!(
        "factorial of {} overflows a 64-bit signed integer (max input is {})",
        number, MAX_FACTORIAL_INPUT
      ))
    })?;
    factor -= 1;
  }

  Ok(result)
}

/// Loader backing the `Factorials` region.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorialLoader;

impl Loader<i64, i64> for FactorialLoader {
  fn validate(&self, key: &i64) -> Result<(), LoadError> {
    if *key < 0 {
      return Err(LoadError::InvalidKey(format!(
        "number [{}] must be greater than or equal to 0",
        key
      )));
    }
    Ok(())
  }

  fn load(&self, key: &i64) -> Result<i64, LoadError> {
    factorial(*key)
  }
}
