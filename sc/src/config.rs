//! Configuration for the sheet cache

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::executor::{DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    /// Directory holding table snapshots
    pub cache_dir: PathBuf,

    /// Directory holding `*.json` credential files
    pub credentials_dir: PathBuf,

    /// Attempts per remote operation
    pub max_attempts: u32,

    /// Base backoff in milliseconds; attempt `n` waits `base * 2^n`
    pub backoff_base_ms: u64,

    /// Seconds before a failed credential is eligible again (unset = only on exhaustion)
    pub credential_cooldown_secs: Option<u64>,

    /// Base URL of the spreadsheet values API
    pub api_url: String,
}

fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sheetcache")
}

fn default_credentials_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sheetcache")
        .join("keys")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            credentials_dir: default_credentials_dir(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            credential_cooldown_secs: None,
            api_url: crate::sheets::DEFAULT_API_URL.to_string(),
        }
    }
}

impl CacheConfig {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path)
                .context(format!("Failed to load config from {}", config_path.display()));
        }

        let default_paths = [
            Some(PathBuf::from(".sheetcache.yml")),
            dirs::config_dir().map(|p| p.join("sheetcache").join("sheetcache.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
            }
        }

        debug!("CacheConfig::load: no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn credential_cooldown(&self) -> Option<Duration> {
        self.credential_cooldown_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.credential_cooldown(), None);
        assert!(config.cache_dir.ends_with("sheetcache"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
credentials-dir: /etc/keys
max-attempts: 5
credential-cooldown-secs: 60
"#;
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.credentials_dir, PathBuf::from("/etc/keys"));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.credential_cooldown(), Some(Duration::from_secs(60)));
        assert_eq!(config.backoff_base_ms, 1000);
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.yml");
        std::fs::write(&path, "backoff-base-ms: 10\n").unwrap();

        let config = CacheConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backoff_base(), Duration::from_millis(10));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(CacheConfig::load(Some(&path)).is_err());
    }
}
