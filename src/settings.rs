use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SETTINGS_DIR: &str = "bookstore-client";
const SETTINGS_FILE: &str = "settings.json";

pub const ENV_API_BASE_URL: &str = "BOOKSTORE_API_URL";
pub const DEFAULT_KEYRING_SERVICE: &str = "bookstore-client";

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read settings file")]
  Io(#[from] std::io::Error),
  #[error("invalid settings json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("{0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
  pub api_base_url: String,
  pub request_timeout_seconds: u64,
  pub connect_timeout_seconds: u64,
  pub remember_session: bool,
  pub expiry_leeway_seconds: u64,
  pub notifications_enabled: bool,
  pub reconnect_initial_delay_ms: u64,
  pub reconnect_max_delay_ms: u64,
  pub keyring_service: String,
}

impl Default for ClientSettings {
  fn default() -> Self {
    Self {
      api_base_url: "http://localhost:5000/api".to_string(),
      request_timeout_seconds: 40,
      connect_timeout_seconds: 10,
      remember_session: true,
      expiry_leeway_seconds: 30,
      notifications_enabled: true,
      reconnect_initial_delay_ms: 1_000,
      reconnect_max_delay_ms: 30_000,
      keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
    }
  }
}

impl ClientSettings {
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
  }

  /// Loads `path` (or the per-user default location), falling back to defaults
  /// when the file does not exist, then applies environment overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
    let path = path.map(Path::to_path_buf).or_else(Self::default_path);
    let mut settings = match path {
      Some(path) if path.exists() => Self::read_file(&path)?,
      _ => Self::default(),
    };
    settings.apply_overrides(std::env::var(ENV_API_BASE_URL).ok());
    settings.validate()?;
    Ok(settings)
  }

  pub fn read_file(path: &Path) -> Result<Self, SettingsError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
  }

  pub fn apply_overrides(&mut self, api_base_url: Option<String>) {
    if let Some(url) = api_base_url.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
      self.api_base_url = url;
    }
  }

  pub fn validate(&self) -> Result<(), SettingsError> {
    let url = self.api_base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
      return Err(SettingsError::Invalid(
        "API base URL must start with http:// or https://.".to_string(),
      ));
    }
    if self.request_timeout_seconds < 1 || self.connect_timeout_seconds < 1 {
      return Err(SettingsError::Invalid("Timeouts must be >= 1 second.".to_string()));
    }
    if self.reconnect_initial_delay_ms == 0 {
      return Err(SettingsError::Invalid("Reconnect delay must be > 0.".to_string()));
    }
    if self.reconnect_max_delay_ms < self.reconnect_initial_delay_ms {
      return Err(SettingsError::Invalid(
        "Maximum reconnect delay must be >= the initial delay.".to_string(),
      ));
    }
    if self.keyring_service.trim().is_empty() {
      return Err(SettingsError::Invalid("Keyring service name is required.".to_string()));
    }
    Ok(())
  }

  pub fn api_url(&self, path: &str) -> String {
    format!(
      "{}/{}",
      self.api_base_url.trim().trim_end_matches('/'),
      path.trim().trim_start_matches('/')
    )
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_seconds)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_seconds)
  }

  pub fn expiry_leeway(&self) -> i64 {
    self.expiry_leeway_seconds.min(i64::MAX as u64) as i64
  }
}
