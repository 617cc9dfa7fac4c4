use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;

/// Outcome tag carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
  Ok,
  NotFound,
  InvalidKey,
  LoadError,
  DuplicateRegion,
  BindError,
  BadRequest,
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Status::Ok => "ok",
      Status::NotFound => "not_found",
      Status::InvalidKey => "invalid_key",
      Status::LoadError => "load_error",
      Status::DuplicateRegion => "duplicate_region",
      Status::BindError => "bind_error",
      Status::BadRequest => "bad_request",
    };
    write!(f, "{}", s)
  }
}

/// A region operation sent by a client.
///
/// Keys and values travel as JSON values and are decoded against the
/// region's declared key/value types on the server. A missing key decodes
/// as `null`, which every region rejects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
  Get {
    id: String,
    region: String,
    #[serde(default)]
    key: Value,
  },
  Put {
    id: String,
    region: String,
    #[serde(default)]
    key: Value,
    #[serde(default)]
    value: Option<Value>,
  },
  Remove {
    id: String,
    region: String,
    #[serde(default)]
    key: Value,
  },
  ContainsKey {
    id: String,
    region: String,
    #[serde(default)]
    key: Value,
  },
  Ping {
    id: String,
  },
}

impl Request {
  pub fn id(&self) -> &str {
    match self {
      Self::Get { id, .. }
      | Self::Put { id, .. }
      | Self::Remove { id, .. }
      | Self::ContainsKey { id, .. }
      | Self::Ping { id } => id,
    }
  }

  /// Region targeted by this request, if any.
  pub fn region(&self) -> Option<&str> {
    match self {
      Self::Get { region, .. }
      | Self::Put { region, .. }
      | Self::Remove { region, .. }
      | Self::ContainsKey { region, .. } => Some(region),
      Self::Ping { .. } => None,
    }
  }
}

/// Status-tagged reply to exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub id: String,
  pub status: Status,
  #[serde(default)]
  pub value: Option<Value>,
  #[serde(default)]
  pub error: Option<String>,
}

impl Response {
  pub fn ok(id: impl Into<String>, value: Option<Value>) -> Self {
    Self {
      id: id.into(),
      status: Status::Ok,
      value,
      error: None,
    }
  }

  pub fn error(id: impl Into<String>, err: &CacheError) -> Self {
    Self {
      id: id.into(),
      status: err.status(),
      value: None,
      error: Some(err.to_string()),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == Status::Ok
  }
}
