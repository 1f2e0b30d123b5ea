use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub store: StoreConfig,
  #[serde(default)]
  pub fetch: FetchConfig,
  #[serde(default)]
  pub links: LinksConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Base URL of the hosted record store, e.g. "https://data.example.com/v1"
  pub base_url: String,
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
}

/// Retry and freshness settings for record queries.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
  /// Retries after the initial attempt for transient failures
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Base backoff delay; retry n waits `retry_delay_ms * 2^(n-1)`
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  /// How long a cached snapshot counts as fresh
  #[serde(default = "default_cache_ttl_minutes")]
  pub cache_ttl_minutes: i64,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      retry_delay_ms: default_retry_delay_ms(),
      cache_ttl_minutes: default_cache_ttl_minutes(),
    }
  }
}

/// Link probe and verdict-cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LinksConfig {
  #[serde(default = "default_verdict_ttl_hours")]
  pub verdict_ttl_hours: i64,
  #[serde(default = "default_probe_timeout_ms")]
  pub probe_timeout_ms: u64,
}

impl Default for LinksConfig {
  fn default() -> Self {
    Self {
      verdict_ttl_hours: default_verdict_ttl_hours(),
      probe_timeout_ms: default_probe_timeout_ms(),
    }
  }
}

fn default_connect_timeout_ms() -> u64 {
  10_000
}

fn default_request_timeout_ms() -> u64 {
  30_000
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  1000
}

fn default_cache_ttl_minutes() -> i64 {
  10
}

fn default_verdict_ttl_hours() -> i64 {
  24
}

fn default_probe_timeout_ms() -> u64 {
  5000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./newsdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/newsdesk/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/newsdesk/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("newsdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("newsdesk").join("config.yaml");
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

  /// Parse configuration from YAML text.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Invalid configuration: {}", e))
  }

  /// Get the store API key from the environment, if one is set.
  ///
  /// Checks NEWSDESK_API_KEY; the store is readable without one in most
  /// deployments, so absence is not an error.
  pub fn api_key() -> Option<String> {
    std::env::var("NEWSDESK_API_KEY").ok()
  }
}
