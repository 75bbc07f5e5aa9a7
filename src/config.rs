use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "habitica-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

fn default_url() -> String {
  "https://habitica.com".to_string()
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Server root, without the `/api/v3` suffix
  #[serde(default = "default_url")]
  pub url: String,
  pub user_id: String,
  /// Suffix for the `x-client` header (defaults to the package name)
  pub client_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Keep the local store on disk between runs
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Explicit database path (defaults to one file per server and user)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./habitica.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/habitica-sync/config.yaml
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
        "No configuration file found. Create one at ~/.config/{}/config.yaml",
        APP_DIR
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("habitica.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse configuration from YAML text.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.api.user_id.trim().is_empty() {
      return Err(eyre!("api.user_id must not be empty"));
    }
    Ok(config)
  }

  /// Where the local store lives, or None when it should stay in memory.
  pub fn cache_path(&self) -> Result<Option<PathBuf>> {
    if !self.cache.enabled {
      return Ok(None);
    }
    if let Some(path) = &self.cache.path {
      return Ok(Some(path.clone()));
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(Some(data_dir.join(APP_DIR).join(self.cache_file_name())))
  }

  /// One cache file per server and account.
  fn cache_file_name(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.api.url.trim_end_matches('/').as_bytes());
    hasher.update(b"\n");
    hasher.update(self.api.user_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("cache-{}.db", &digest[..16])
  }

  /// Directory for log files.
  pub fn log_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join(APP_DIR).join("logs"))
  }

  /// Get the Habitica API token from environment variables.
  ///
  /// Checks HABITICA_API_TOKEN first, then HABITICA_API_KEY as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("HABITICA_API_TOKEN")
      .or_else(|_| std::env::var("HABITICA_API_KEY"))
      .map_err(|_| {
        eyre!("Habitica API token not found. Set HABITICA_API_TOKEN or HABITICA_API_KEY environment variable.")
      })
  }
}
