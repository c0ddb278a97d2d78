use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub supabase: SupabaseConfig,
  #[serde(default)]
  pub weather: WeatherConfig,
  /// Override for the sync database (response caches + write queue)
  pub sync_db: Option<PathBuf>,
  /// Endpoint probed to detect connectivity restoration.
  /// Defaults to the backend's auth health endpoint.
  pub health_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
  /// Project base URL, e.g. https://abcdefg.supabase.co
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
  /// OpenWeather city id used when the caller gives no coordinates
  #[serde(default = "default_city_id")]
  pub city_id: u64,
}

impl Default for WeatherConfig {
  fn default() -> Self {
    Self {
      city_id: default_city_id(),
    }
  }
}

fn default_city_id() -> u64 {
  // Atescatempa, the community's home municipality.
  3_599_633
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./agrosync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/agrosync/config.yaml
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
        "No configuration file found. Create one at ~/.config/agrosync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("agrosync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("agrosync").join("config.yaml");
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

  /// Get the backend anon API key from environment variables.
  ///
  /// Checks AGROSYNC_SUPABASE_KEY first, then SUPABASE_ANON_KEY.
  pub fn get_anon_key() -> Result<String> {
    std::env::var("AGROSYNC_SUPABASE_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set AGROSYNC_SUPABASE_KEY or SUPABASE_ANON_KEY.")
      })
  }

  /// Get the weather provider API key from environment variables.
  ///
  /// Checks AGROSYNC_OPENWEATHER_KEY first, then OPENWEATHER_API_KEY.
  pub fn get_weather_key() -> Result<String> {
    std::env::var("AGROSYNC_OPENWEATHER_KEY")
      .or_else(|_| std::env::var("OPENWEATHER_API_KEY"))
      .map_err(|_| {
        eyre!("Weather API key not found. Set AGROSYNC_OPENWEATHER_KEY or OPENWEATHER_API_KEY.")
      })
  }

  /// The connectivity probe target.
  pub fn health_url(&self) -> String {
    self
      .health_url
      .clone()
      .unwrap_or_else(|| format!("{}/auth/v1/health", self.supabase.url.trim_end_matches('/')))
  }

  /// Location of the sync database.
  pub fn sync_db_path(&self) -> Result<PathBuf> {
    match &self.sync_db {
      Some(path) => Ok(path.clone()),
      None => crate::cache::default_db_path(),
    }
  }
}
