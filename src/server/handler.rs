use std::sync::Arc;

use serde_json::Value;

use crate::error::CacheError;
use crate::region::{RegionHandle, RegionRegistry};
use crate::types::{Request, Response};

/// Dispatches decoded requests to regions and turns every outcome,
/// including failures, into a response.
pub struct RequestHandler {
  registry: Arc<RegionRegistry>,
}

impl RequestHandler {
  pub fn new(registry: Arc<RegionRegistry>) -> Self {
    Self { registry }
  }

  pub async fn handle(&self, req: Request) -> Response {
    match req {
      Request::Ping { id } => Response::ok(id, None),
      Request::Get { id, region, key } => match self.resolve(&region) {
        Ok(r) => match r.get(&key).await {
          Ok(value) => Response::ok(id, Some(value)),
          Err(e) => Response::error(id, &e),
        },
        Err(e) => Response::error(id, &e),
      },
      Request::Put {
        id,
        region,
        key,
        value,
      } => {
        let result = self.resolve(&region).and_then(|r| {
          let value = value
            .ok_or_else(|| CacheError::BadRequest("put requires a value".into()))?;
          r.put(&key, &value)
        });
        match result {
          Ok(()) => Response::ok(id, None),
          Err(e) => Response::error(id, &e),
        }
      }
      Request::Remove { id, region, key } => {
        match self.resolve(&region).and_then(|r| r.remove(&key)) {
          Ok(removed) => Response::ok(id, Some(Value::Bool(removed))),
          Err(e) => Response::error(id, &e),
        }
      }
      Request::ContainsKey { id, region, key } => {
        match self.resolve(&region).and_then(|r| r.contains_key(&key)) {
          Ok(present) => Response::ok(id, Some(Value::Bool(present))),
          Err(e) => Response::error(id, &e),
        }
      }
    }
  }

  fn resolve(&self, region: &str) -> Result<Arc<dyn RegionHandle>, CacheError> {
    self.registry.get_region(region)
  }
}
