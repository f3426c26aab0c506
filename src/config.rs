//! Startup configuration read from the environment.
//!
//! All tunables are consumed once at process start into an [`AgentConfig`]
//! that is handed to the components that need it; nothing reads the
//! environment after startup.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Tuning for the shared outbound HTTP client.
#[derive(Debug, Clone)]
pub struct UpstreamOptions {
  /// Deadline covering one forward attempt including the body read.
  /// `None` disables the deadline.
  pub read_timeout: Option<Duration>,
  /// How long pooled idle connections are kept alive.
  pub idle_timeout: Duration,
  /// Upper bound on idle connections kept per backend.
  pub max_idle_conns: usize,
}

impl Default for UpstreamOptions {
  fn default() -> Self {
    Self {
      read_timeout: Some(Duration::from_secs(60)),
      idle_timeout: Duration::from_secs(90),
      max_idle_conns: 32,
    }
  }
}

/// Feature switches and capacities for one agent process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  /// Memoize serialized responses keyed by invocation fingerprint.
  pub response_cache_enabled: bool,
  /// Answer dispatcher bulk probes over advisory fingerprints.
  pub bulk_probe_enabled: bool,
  /// Run the asset proxy and rewrite origin references in request bodies.
  pub asset_cache_enabled: bool,
  pub csv_sink_enabled: bool,
  pub csv_path: String,
  pub response_cache_capacity: usize,
  pub asset_cache_capacity: usize,
  /// This node's address as seen by the function containers.
  pub self_ip: String,
  /// `<self_ip>:<proxy_port>`, substituted for the origin host in request
  /// bodies. Filled in once the proxy port is known.
  pub self_endpoint: String,
  /// Host of the static-asset origin server.
  pub origin_host: String,
  /// Total forward attempts per invocation, transport failures only.
  pub retry_budget: u32,
  /// Container runtime socket for the production function lookup backend.
  pub runtime_sock: String,
  /// Static `name -> ip` table for the built-in lookup backend.
  pub functions: HashMap<String, String>,
  pub upstream: UpstreamOptions,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      response_cache_enabled: true,
      bulk_probe_enabled: true,
      asset_cache_enabled: false,
      csv_sink_enabled: false,
      csv_path: "invocations.csv".to_string(),
      response_cache_capacity: 10,
      asset_cache_capacity: 32,
      self_ip: String::new(),
      self_endpoint: String::new(),
      origin_host: String::new(),
      retry_budget: 3,
      runtime_sock: "/run/containerd/containerd.sock".to_string(),
      functions: HashMap::new(),
      upstream: UpstreamOptions::default(),
    }
  }
}

impl AgentConfig {
  /// Reads the `AGENT_*` variables from the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_vars(|var| env::var(var).ok())
  }

  /// Builds a config from an arbitrary variable source.
  pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    config.response_cache_enabled =
      read_bool(&get, "AGENT_USE_CACHE", config.response_cache_enabled)?;
    config.bulk_probe_enabled =
      read_bool(&get, "AGENT_CACHE_CHECKING", config.bulk_probe_enabled)?;
    config.asset_cache_enabled =
      read_bool(&get, "AGENT_FILE_CACHING", config.asset_cache_enabled)?;
    config.csv_sink_enabled = read_bool(&get, "AGENT_WRITE_CSV", config.csv_sink_enabled)?;
    if let Some(path) = get("AGENT_CSV_PATH") {
      config.csv_path = path;
    }
    config.response_cache_capacity = read_parsed(
      &get,
      "AGENT_MAX_CACHE_ITEMS",
      config.response_cache_capacity,
    )?;
    config.asset_cache_capacity =
      read_parsed(&get, "AGENT_FILE_CACHE_SIZE", config.asset_cache_capacity)?;
    config.retry_budget = read_parsed(&get, "AGENT_RETRY_BUDGET", config.retry_budget)?;
    if let Some(sock) = get("AGENT_SOCK") {
      config.runtime_sock = sock;
    }
    config.functions = read_table(&get, "AGENT_FUNCTIONS")?;

    let read_timeout: u64 = read_parsed(&get, "AGENT_UPSTREAM_READ_TIMEOUT_SECS", 60)?;
    config.upstream.read_timeout = (read_timeout > 0).then(|| Duration::from_secs(read_timeout));
    config.upstream.idle_timeout =
      Duration::from_secs(read_parsed(&get, "AGENT_UPSTREAM_IDLE_TIMEOUT_SECS", 90)?);
    config.upstream.max_idle_conns = read_parsed(
      &get,
      "AGENT_UPSTREAM_MAX_IDLE_CONNS",
      config.upstream.max_idle_conns,
    )?;

    config.self_ip = get("AGENT_SELF_IP").unwrap_or_default();
    config.origin_host = get("AGENT_ORIGIN_HOST").unwrap_or_default();
    if config.asset_cache_enabled {
      if config.self_ip.is_empty() {
        return Err(ConfigError::Missing {
          var: "AGENT_SELF_IP",
          feature: "AGENT_FILE_CACHING",
        });
      }
      if config.origin_host.is_empty() {
        return Err(ConfigError::Missing {
          var: "AGENT_ORIGIN_HOST",
          feature: "AGENT_FILE_CACHING",
        });
      }
    }

    Ok(config)
  }
}

fn read_bool(
  get: &impl Fn(&str) -> Option<String>,
  var: &'static str,
  default: bool,
) -> Result<bool, ConfigError> {
  match get(var) {
    None => Ok(default),
    Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" => Ok(true),
      "0" | "false" | "no" => Ok(false),
      _ => Err(ConfigError::Invalid { var, value: raw }),
    },
  }
}

fn read_parsed<T: FromStr>(
  get: &impl Fn(&str) -> Option<String>,
  var: &'static str,
  default: T,
) -> Result<T, ConfigError> {
  match get(var) {
    None => Ok(default),
    Some(raw) => raw
      .trim()
      .parse()
      .map_err(|_| ConfigError::Invalid { var, value: raw }),
  }
}

/// Parses `name=ip[,name=ip...]` into a lookup table.
fn read_table(
  get: &impl Fn(&str) -> Option<String>,
  var: &'static str,
) -> Result<HashMap<String, String>, ConfigError> {
  let Some(raw) = get(var) else {
    return Ok(HashMap::new());
  };
  let mut table = HashMap::new();
  for pair in raw.split(',').filter(|pair| !pair.trim().is_empty()) {
    let Some((name, ip)) = pair.split_once('=') else {
      return Err(ConfigError::Invalid { var, value: raw });
    };
    table.insert(name.trim().to_string(), ip.trim().to_string());
  }
  Ok(table)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |var| {
      pairs
        .iter()
        .find(|(name, _)| *name == var)
        .map(|(_, value)| value.to_string())
    }
  }

  #[test]
  fn defaults_apply_when_environment_is_empty() {
    let config = AgentConfig::from_vars(|_| None).unwrap();
    assert!(config.response_cache_enabled);
    assert!(config.bulk_probe_enabled);
    assert!(!config.asset_cache_enabled);
    assert_eq!(config.response_cache_capacity, 10);
    assert_eq!(config.retry_budget, 3);
    assert_eq!(config.upstream.read_timeout, Some(Duration::from_secs(60)));
  }

  #[test]
  fn parses_flags_and_capacities() {
    let config = AgentConfig::from_vars(vars(&[
      ("AGENT_USE_CACHE", "false"),
      ("AGENT_MAX_CACHE_ITEMS", "128"),
      ("AGENT_RETRY_BUDGET", "5"),
      ("AGENT_UPSTREAM_READ_TIMEOUT_SECS", "0"),
      ("AGENT_FUNCTIONS", "echo=10.0.0.5, shout=10.0.0.6"),
    ]))
    .unwrap();
    assert!(!config.response_cache_enabled);
    assert_eq!(config.response_cache_capacity, 128);
    assert_eq!(config.retry_budget, 5);
    assert_eq!(config.upstream.read_timeout, None);
    assert_eq!(config.functions["echo"], "10.0.0.5");
    assert_eq!(config.functions["shout"], "10.0.0.6");
  }

  #[test]
  fn rejects_unparseable_values() {
    assert!(AgentConfig::from_vars(vars(&[("AGENT_USE_CACHE", "maybe")])).is_err());
    assert!(AgentConfig::from_vars(vars(&[("AGENT_MAX_CACHE_ITEMS", "lots")])).is_err());
    assert!(AgentConfig::from_vars(vars(&[("AGENT_FUNCTIONS", "echo")])).is_err());
  }

  #[test]
  fn asset_caching_requires_self_ip_and_origin() {
    let missing = AgentConfig::from_vars(vars(&[("AGENT_FILE_CACHING", "true")]));
    assert!(missing.is_err());

    let config = AgentConfig::from_vars(vars(&[
      ("AGENT_FILE_CACHING", "true"),
      ("AGENT_SELF_IP", "192.168.0.1"),
      ("AGENT_ORIGIN_HOST", "origin.example"),
    ]))
    .unwrap();
    assert_eq!(config.self_ip, "192.168.0.1");
    assert_eq!(config.origin_host, "origin.example");
  }
}
