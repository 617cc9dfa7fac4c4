use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::region::RegionDefinition;
use crate::types::frame::DEFAULT_MAX_MESSAGE_SIZE;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax. Substituted values are not
/// expanded again.
fn expand_env_vars(input: &str) -> String {
  let mut result = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(pos) = rest.find('$') {
    result.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];

    if let Some(braced) = after.strip_prefix('{') {
      if let Some(end) = braced.find('}') {
        result.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
        rest = &braced[end + 1..];
        continue;
      }
    } else {
      // Word boundary: ASCII alphanumeric + underscore, so the byte length
      // equals the char count.
      let var_len = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        result.push_str(&std::env::var(&after[..var_len]).unwrap_or_default());
        rest = &after[var_len..];
        continue;
      }
    }

    result.push('$');
    rest = after;
  }

  result.push_str(rest);
  result
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub limits: LimitsSection,
  #[serde(default)]
  pub logging: LoggingSection,
  /// Regions created at startup, in order.
  #[serde(default = "default_regions")]
  pub regions: Vec<RegionDefinition>,
}

fn default_regions() -> Vec<RegionDefinition> {
  vec![RegionDefinition::factorials()]
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      server: ServerSection::default(),
      limits: LimitsSection::default(),
      logging: LoggingSection::default(),
      regions: default_regions(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  /// Name reported in logs
  #[serde(default = "default_name")]
  pub name: String,
  /// Bind address for the cache server
  #[serde(default = "default_host")]
  pub host: String,
  /// Cache server port (0 picks an ephemeral port)
  #[serde(default = "default_port")]
  pub port: u16,
  /// Host name clients should use to reach this server
  #[serde(default = "default_host")]
  pub hostname_for_clients: String,
  /// Idle connection timeout in milliseconds (0 = none)
  #[serde(default = "default_max_time_between_pings_ms")]
  pub max_time_between_pings_ms: u64,
}

fn default_name() -> String {
  "RegionServer".into()
}

fn default_host() -> String {
  "localhost".into()
}

fn default_port() -> u16 {
  40404
}

fn default_max_time_between_pings_ms() -> u64 {
  15000 // 15 seconds
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      name: default_name(),
      host: default_host(),
      port: default_port(),
      hostname_for_clients: default_host(),
      max_time_between_pings_ms: default_max_time_between_pings_ms(),
    }
  }
}

/// Request and connection limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
  /// Per-request timeout in milliseconds (0 = no timeout)
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,

  /// Maximum frame size in bytes
  #[serde(default = "default_max_message_size")]
  pub max_message_size: u32,

  /// How long shutdown waits for in-flight requests, in milliseconds
  #[serde(default = "default_drain_timeout_ms")]
  pub drain_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
  30000 // 30 seconds
}
fn default_max_message_size() -> u32 {
  DEFAULT_MAX_MESSAGE_SIZE
}
fn default_drain_timeout_ms() -> u64 {
  5000
}

impl Default for LimitsSection {
  fn default() -> Self {
    Self {
      request_timeout_ms: default_request_timeout_ms(),
      max_message_size: default_max_message_size(),
      drain_timeout_ms: default_drain_timeout_ms(),
    }
  }
}

impl LimitsSection {
  pub fn request_timeout(&self) -> Option<Duration> {
    if self.request_timeout_ms == 0 {
      None
    } else {
      Some(Duration::from_millis(self.request_timeout_ms))
    }
  }

  pub fn drain_timeout(&self) -> Duration {
    Duration::from_millis(self.drain_timeout_ms)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}
fn default_level() -> String {
  "info".into()
}
impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["regiond.yaml", "regiond.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }

  pub fn idle_timeout(&self) -> Option<Duration> {
    if self.server.max_time_between_pings_ms == 0 {
      None
    } else {
      Some(Duration::from_millis(self.server.max_time_between_pings_ms))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expand_braced_var() {
    std::env::set_var("REGIOND_TEST_HOST", "10.0.0.7");
    assert_eq!(expand_env_vars("host: ${REGIOND_TEST_HOST}"), "host: 10.0.0.7");
  }

  #[test]
  fn test_expand_bare_var() {
    std::env::set_var("REGIOND_TEST_PORT", "40500");
    assert_eq!(expand_env_vars("port: $REGIOND_TEST_PORT\n"), "port: 40500\n");
  }

  #[test]
  fn test_expand_keeps_non_ascii_text() {
    std::env::set_var("REGIOND_TEST_NAME", "nœud");
    assert_eq!(
      expand_env_vars("# région — $REGIOND_TEST_NAME ${REGIOND_TEST_NAME}é"),
      "# région — nœud nœudé"
    );
  }

  #[test]
  fn test_expanded_values_are_not_rescanned() {
    std::env::set_var("REGIOND_TEST_SELF", "${REGIOND_TEST_SELF}");
    assert_eq!(expand_env_vars("a: ${REGIOND_TEST_SELF}"), "a: ${REGIOND_TEST_SELF}");
  }

  #[test]
  fn test_lone_dollar_and_unterminated_brace() {
    assert_eq!(expand_env_vars("cost: 5$ and ${oops"), "cost: 5$ and ${oops");
  }

  #[test]
  fn test_expand_missing_var_is_empty() {
    assert_eq!(expand_env_vars("x: ${REGIOND_TEST_UNSET_VAR}"), "x: ");
  }

  #[test]
  fn test_timeouts() {
    let mut config = ServerConfig::default();
    assert_eq!(config.idle_timeout(), Some(Duration::from_secs(15)));
    config.server.max_time_between_pings_ms = 0;
    assert_eq!(config.idle_timeout(), None);
    config.limits.request_timeout_ms = 0;
    assert_eq!(config.limits.request_timeout(), None);
  }
}
