use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Mystery Message origin that requests are forwarded to
  pub origin: String,
  /// Address the daemon listens on
  pub listen: SocketAddr,
  /// Cache generation; change it whenever the core assets or strategies change
  pub generation: String,
  /// Paths under this prefix are API calls (network-first)
  pub api_prefix: String,
  /// API path that degrades to an empty message list when offline
  pub empty_list_endpoint: String,
  /// Page served for failed navigations; must be one of `core_assets`
  pub offline_page: String,
  /// Routes and icons prefetched at install time
  pub core_assets: Vec<String>,
  /// SQLite database path (default: $XDG_DATA_HOME/mystery-offline/cache.db)
  pub database: Option<PathBuf>,
  /// Also write logs to a daily-rolling file at this path
  pub log_file: Option<PathBuf>,
  pub notifications: NotificationsConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
      generation: "mystery-message-v1".to_string(),
      api_prefix: "/api/".to_string(),
      empty_list_endpoint: "/api/get-messages".to_string(),
      offline_page: "/offline".to_string(),
      core_assets: [
        "/",
        "/dashboard",
        "/about",
        "/sign-in",
        "/sign-up",
        "/offline",
        "/manifest.webmanifest",
        "/icon-192x192.svg",
        "/icon-512x512.svg",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      database: None,
      log_file: None,
      notifications: NotificationsConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  /// Title used when a push payload carries none
  pub default_title: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  /// Opened by the "view" action
  pub view_route: String,
  /// Opened by a plain click on the notification
  pub default_route: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      default_title: "Mystery Message".to_string(),
      icon: "/icon-192x192.svg".to_string(),
      badge: "/icon-72x72.svg".to_string(),
      vibrate: vec![100, 50, 100],
      view_route: "/dashboard".to_string(),
      default_route: "/".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mystery-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mystery-offline/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mystery-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mystery-offline").join("config.yaml");
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
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;

    config.validate()?;
    Ok(config)
  }

  /// Check the cross-field constraints the worker relies on.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;

    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("api_prefix must start with '/': {}", self.api_prefix));
    }
    if self.generation.trim().is_empty() {
      return Err(eyre!("generation must not be empty"));
    }
    if !self.core_assets.contains(&self.offline_page) {
      return Err(eyre!(
        "offline_page {} must be listed in core_assets",
        self.offline_page
      ));
    }

    Ok(())
  }

  /// The origin as a URL.
  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;

    match url.scheme() {
      "http" | "https" => Ok(url),
      other => Err(eyre!("Unsupported origin scheme {}: {}", other, self.origin)),
    }
  }
}
