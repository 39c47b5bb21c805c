use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::datasets::Dataset;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub prefetch: PrefetchConfig,
  #[serde(default)]
  pub search: SearchConfig,
  /// Datasets to add, or built-in datasets to override by key
  #[serde(default)]
  pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Budget for reader-initiated fetches
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }
}

fn default_timeout_ms() -> u64 {
  5000
}

fn default_connect_timeout_ms() -> u64 {
  3000
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// SQLite file in the data directory
  #[default]
  Sqlite,
  /// Process memory, gone on exit
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// Override for the SQLite file location
  pub path: Option<PathBuf>,
  /// Expire entries after this many seconds. Unset keeps entries until invalidated.
  pub ttl_secs: Option<u64>,
}

impl CacheConfig {
  pub fn ttl(&self) -> Option<chrono::Duration> {
    self
      .ttl_secs
      .and_then(|secs| i64::try_from(secs).ok())
      .map(chrono::Duration::seconds)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrefetchConfig {
  /// How long sign-in waits for the warm-up before letting the user in
  #[serde(default = "default_allowance_ms")]
  pub allowance_ms: u64,
  /// Dataset keys to warm. Empty means every known dataset.
  #[serde(default)]
  pub datasets: Vec<String>,
}

impl Default for PrefetchConfig {
  fn default() -> Self {
    Self {
      allowance_ms: default_allowance_ms(),
      datasets: Vec::new(),
    }
  }
}

impl PrefetchConfig {
  pub fn allowance(&self) -> Duration {
    Duration::from_millis(self.allowance_ms)
  }
}

fn default_allowance_ms() -> u64 {
  15_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// Shorter terms clear the results instead of searching
  #[serde(default = "default_min_term_len")]
  pub min_term_len: usize,
  #[serde(default = "default_limit")]
  pub limit: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      debounce_ms: default_debounce_ms(),
      min_term_len: default_min_term_len(),
      limit: default_limit(),
    }
  }
}

impl SearchConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

fn default_debounce_ms() -> u64 {
  500
}

fn default_min_term_len() -> usize {
  2
}

fn default_limit() -> usize {
  20
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./portal-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/portal-cache/config.yaml
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
        "No configuration file found. Create one at ~/.config/portal-cache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("portal-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("portal-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.timeout_ms == 0 {
      return Err(eyre!("api.timeout_ms must be greater than zero"));
    }
    Ok(config)
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks PORTAL_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PORTAL_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
