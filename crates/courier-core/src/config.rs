use crate::error::{CourierError, Result};
use crate::job::RetryPolicy;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RemoteConfig
// ---------------------------------------------------------------------------

/// Where named-user updates are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8088".to_string()
}

fn default_device_type() -> String {
    "android".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_key: String::new(),
            app_secret: String::new(),
            device_type: default_device_type(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig / ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// File name of the redb database inside `.courier/`.
    #[serde(default = "default_store_file")]
    pub file: String,
}

fn default_store_file() -> String {
    paths::DEFAULT_STORE_FILE.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file: default_store_file(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3150
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            remote: RemoteConfig::default(),
            retry: RetryPolicy::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CourierError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn store_path(&self, root: &Path) -> std::path::PathBuf {
        paths::store_path(root, &self.store.file)
    }

    /// Check for settings that will make reconciliation fail or misbehave.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "remote.base_url '{}' must start with http:// or https://",
                    self.remote.base_url
                ),
            });
        }
        if self.remote.app_key.is_empty() || self.remote.app_secret.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "remote.app_key / remote.app_secret not set; named user updates will be rejected".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "retry.max_attempts must be at least 1".into(),
            });
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({}); every retry waits the cap",
                    self.retry.initial_backoff_ms, self.retry.max_backoff_ms
                ),
            });
        }
        if self.store.file.trim().is_empty() || self.store.file.contains(['/', '\\']) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("store.file '{}' must be a plain file name", self.store.file),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.server.port, 3150);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "remote:\n  base_url: https://api.example.com\n  app_key: key\nretry:\n  max_attempts: 2\n",
        )
        .unwrap();
        assert_eq!(cfg.remote.base_url, "https://api.example.com");
        assert_eq!(cfg.remote.timeout_secs, 30);
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.max_backoff_ms, 300_000);
    }

    #[test]
    fn load_without_init_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(CourierError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.remote.app_key = "key".into();
        cfg.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn validate_flags_bad_settings() {
        let mut cfg = Config::default();
        cfg.remote.base_url = "ftp://nope".into();
        cfg.retry.max_attempts = 0;
        cfg.store.file = "../escape.redb".into();

        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 3);
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("app_key")));
    }

    #[test]
    fn default_config_only_warns_about_credentials() {
        let warnings = Config::default().validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
    }
}
