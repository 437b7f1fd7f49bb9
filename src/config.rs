use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::params::Params;

/// Per-endpoint engine settings.
///
/// Every key is optional in a config file; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Issue GETs automatically (on bind, on parameter change, from triggers)
  pub enabled: bool,
  /// Keep a `page` parameter
  pub pagination: bool,
  /// Item-count limit sent as `limit`
  pub limit: Option<u32>,
  pub initial_params: Params,
  /// Bind to a single resource (`endpoint/id`) instead of a collection
  pub resource_id: Option<String>,
  pub refetch_on_window_focus: bool,
  pub refetch_on_reconnect: bool,
  pub refetch_interval_ms: Option<u64>,
  pub retry_count: u32,
  pub retry_delay_ms: u64,
  pub optimistic_updates: bool,
  /// Append pages after the first instead of replacing them
  pub infinite_scroll: bool,
  pub debounce_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      pagination: false,
      limit: None,
      initial_params: Params::new(),
      resource_id: None,
      refetch_on_window_focus: false,
      refetch_on_reconnect: false,
      refetch_interval_ms: None,
      retry_count: 3,
      retry_delay_ms: 1000,
      optimistic_updates: false,
      infinite_scroll: false,
      debounce_ms: 300,
    }
  }
}

impl EngineConfig {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn refetch_interval(&self) -> Option<Duration> {
    self
      .refetch_interval_ms
      .filter(|ms| *ms > 0)
      .map(Duration::from_millis)
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn with_pagination(mut self, pagination: bool) -> Self {
    self.pagination = pagination;
    self
  }

  pub fn with_limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn with_initial_params(mut self, params: Params) -> Self {
    self.initial_params = params;
    self
  }

  pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
    self.resource_id = Some(id.into());
    self
  }

  pub fn with_refetch_on_window_focus(mut self, enabled: bool) -> Self {
    self.refetch_on_window_focus = enabled;
    self
  }

  pub fn with_refetch_on_reconnect(mut self, enabled: bool) -> Self {
    self.refetch_on_reconnect = enabled;
    self
  }

  pub fn with_refetch_interval(mut self, period: Duration) -> Self {
    self.refetch_interval_ms = Some(period.as_millis() as u64);
    self
  }

  pub fn with_retry(mut self, count: u32, base_delay: Duration) -> Self {
    self.retry_count = count;
    self.retry_delay_ms = base_delay.as_millis() as u64;
    self
  }

  pub fn with_optimistic_updates(mut self, enabled: bool) -> Self {
    self.optimistic_updates = enabled;
    self
  }

  pub fn with_infinite_scroll(mut self, enabled: bool) -> Self {
    self.infinite_scroll = enabled;
    self
  }

  pub fn with_debounce(mut self, window: Duration) -> Self {
    self.debounce_ms = window.as_millis() as u64;
    self
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Root of the REST API, e.g. `https://admin.example.com/api`
  pub base_url: String,
  /// Static headers sent with every request
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Engine settings for endpoints without their own `engine` section
  #[serde(default)]
  pub defaults: EngineConfig,
  #[serde(default)]
  pub endpoints: BTreeMap<String, EndpointConfig>,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
  pub path: String,
  pub engine: Option<EngineConfig>,
}

impl Config {
  /// A config with no file behind it.
  pub fn with_base_url(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      headers: BTreeMap::new(),
      timeout_secs: default_timeout_secs(),
      defaults: EngineConfig::default(),
      endpoints: BTreeMap::new(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./restsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/restsync/config.yaml
  ///
  /// `RESTSYNC_BASE_URL` overrides the file's `base_url`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/restsync/config.yaml \
           or pass --base-url."
        ))
      }
    };

    if let Ok(base_url) = std::env::var("RESTSYNC_BASE_URL") {
      config.base_url = base_url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("restsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("restsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Resolve a named endpoint, or treat `name` as a literal path.
  pub fn resolve_endpoint(&self, name: &str) -> (String, EngineConfig) {
    match self.endpoints.get(name) {
      Some(endpoint) => (
        endpoint.path.clone(),
        endpoint
          .engine
          .clone()
          .unwrap_or_else(|| self.defaults.clone()),
      ),
      None => (name.to_string(), self.defaults.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::params::ParamValue;

  const SAMPLE: &str = r#"
base_url: https://admin.example.com/api
headers:
  X-Client: restsync
defaults:
  retry_count: 1
  optimistic_updates: true
endpoints:
  assets:
    path: /fixed-assets
    engine:
      pagination: true
      infinite_scroll: true
      limit: 20
      initial_params:
        status: active
  departments:
    path: /departments
"#;

  #[test]
  fn test_parse_config() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    assert_eq!(config.base_url, "https://admin.example.com/api");
    assert_eq!(config.timeout_secs, 30);
    assert_eq!(config.headers.get("X-Client").map(String::as_str), Some("restsync"));
    assert_eq!(config.defaults.retry_count, 1);
    assert!(config.defaults.optimistic_updates);
    // untouched keys keep their defaults
    assert_eq!(config.defaults.retry_delay_ms, 1000);
    assert_eq!(config.defaults.debounce(), Duration::from_millis(300));
  }

  #[test]
  fn test_resolve_endpoint() {
    let config = Config::from_yaml(SAMPLE).unwrap();

    let (path, engine) = config.resolve_endpoint("assets");
    assert_eq!(path, "/fixed-assets");
    assert!(engine.pagination && engine.infinite_scroll);
    assert_eq!(engine.limit, Some(20));
    assert_eq!(
      engine.initial_params.get("status"),
      Some(&ParamValue::Text("active".into()))
    );
    assert_eq!(engine.retry_count, 3);

    let (path, engine) = config.resolve_endpoint("departments");
    assert_eq!(path, "/departments");
    assert_eq!(engine, config.defaults);

    let (path, _) = config.resolve_endpoint("/custody-records");
    assert_eq!(path, "/custody-records");
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/restsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_zero_interval_is_disabled() {
    let config = EngineConfig {
      refetch_interval_ms: Some(0),
      ..EngineConfig::default()
    };
    assert_eq!(config.refetch_interval(), None);
    assert_eq!(
      config.with_refetch_interval(Duration::from_secs(5)).refetch_interval(),
      Some(Duration::from_secs(5))
    );
  }
}
