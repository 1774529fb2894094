use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CachePolicy, DEFAULT_VALIDITY_HOURS};

const DEFAULT_API_URL: &str = "https://restcountries.com/v2";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the REST Countries v2 API
  #[serde(default = "default_api_url")]
  pub base_url: String,
  /// Per-request timeout applied by the HTTP client
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_api_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long fetched countries stay fresh
  #[serde(default = "default_validity_hours")]
  pub validity_hours: i64,
  /// Policy used when the command line does not name one
  #[serde(default)]
  pub default_policy: CachePolicy,
  /// Database file (defaults to $XDG_DATA_HOME/countrydex/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      validity_hours: default_validity_hours(),
      default_policy: CachePolicy::default(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Log file directory (defaults to $XDG_DATA_HOME/countrydex/logs)
  pub directory: Option<PathBuf>,
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_validity_hours() -> i64 {
  DEFAULT_VALIDITY_HOURS
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./countrydex.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/countrydex/config.yaml
  ///
  /// Falls back to defaults when no file exists. `COUNTRYDEX_API_URL`
  /// overrides the API base URL either way.
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
      None => Self::default(),
    };

    if let Ok(url) = std::env::var("COUNTRYDEX_API_URL") {
      config.api.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("countrydex.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("countrydex").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.cache.validity_hours <= 0 {
      return Err(eyre!(
        "cache.validity_hours must be positive, got {}",
        self.cache.validity_hours
      ));
    }
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be positive"));
    }
    Ok(())
  }

  /// Where the cache database lives.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }

  /// Where log files are written.
  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log.directory {
      Some(dir) => Ok(dir.clone()),
      None => Ok(data_dir()?.join("logs")),
    }
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("countrydex"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let file = write_config("cache:\n  validity_hours: 6\n");
    let config = Config::load_from_path(file.path()).unwrap();

    assert_eq!(config.cache.validity_hours, 6);
    assert_eq!(config.cache.default_policy, CachePolicy::CacheFirst);
    assert_eq!(config.api.base_url, DEFAULT_API_URL);
    assert_eq!(config.api.timeout_secs, 30);
  }

  #[test]
  fn test_policy_names_are_kebab_case() {
    let file = write_config("cache:\n  default_policy: network-first\n  path: /tmp/c.db\n");
    let config = Config::load_from_path(file.path()).unwrap();

    assert_eq!(config.cache.default_policy, CachePolicy::NetworkFirst);
    assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/c.db"));
  }

  #[test]
  fn test_non_positive_validity_rejected() {
    let file = write_config("cache:\n  validity_hours: 0\n");
    let config = Config::load_from_path(file.path()).unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_malformed_yaml_is_error() {
    let file = write_config("api: [unclosed\n");
    assert!(Config::load_from_path(file.path()).is_err());
  }
}
