//! Repricer configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use sheetcache::CacheConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::row::ColumnLayout;

/// Main repricer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Main table holding one catalog item per row
    pub sheet: SheetConfig,

    /// Worker pool and pacing
    pub scheduler: SchedulerConfig,

    /// Cache, credentials and remote retry settings
    pub cache: CacheConfig,

    /// Marketplace API access
    pub marketplace: MarketplaceConfig,

    /// Competitor page scraping
    pub scraper: ScraperConfig,

    /// Column letters of the main table
    pub layout: ColumnLayout,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the main table is named and the marketplace secrets are
    /// present in the environment.
    pub fn validate(&self) -> Result<()> {
        self.validate_sheet()?;
        for var in [&self.marketplace.client_id_env, &self.marketplace.client_secret_env] {
            if std::env::var(var).is_err() {
                return Err(eyre::eyre!("Marketplace credential not found. Set the {} environment variable.", var));
            }
        }
        Ok(())
    }

    /// Validate only what is needed to read the main table
    pub fn validate_sheet(&self) -> Result<()> {
        if self.sheet.table_id.trim().is_empty() {
            return Err(eyre::eyre!("sheet.table-id is not set"));
        }
        if self.sheet.table_name.trim().is_empty() {
            return Err(eyre::eyre!("sheet.table-name is not set"));
        }
        self.layout.validate()?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .repricer.yml
        let local_config = PathBuf::from(".repricer.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/repricer/repricer.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("repricer").join("repricer.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = [
            config_path.cloned(),
            Some(PathBuf::from(".repricer.yml")),
            dirs::config_dir().map(|d| d.join("repricer").join("repricer.yml")),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|path| path.exists())
            .and_then(|path| Self::load_from_file(path).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Main table location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SheetConfig {
    /// Remote table (spreadsheet) id
    pub table_id: String,

    /// Table (tab) name
    pub table_name: String,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            table_id: String::new(),
            table_name: "Sheet1".to_string(),
        }
    }
}

/// Batch and pacing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Worker threads per batch (also the batch size)
    pub workers: usize,

    /// Seconds to wait for stragglers once the queue is drained
    pub join_timeout_secs: u64,

    /// Seconds between full runs in continuous mode
    pub round_relax_secs: u64,

    /// Relax seconds applied when a row does not set its own
    pub default_row_relax_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            join_timeout_secs: 30,
            round_relax_secs: 10,
            default_row_relax_secs: 0.0,
        }
    }
}

impl SchedulerConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn round_relax(&self) -> Duration {
        Duration::from_secs(self.round_relax_secs)
    }
}

/// Marketplace API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MarketplaceConfig {
    /// Sales API base URL
    pub api_url: String,

    /// OAuth token endpoint
    pub token_url: String,

    /// Environment variable holding the client id
    pub client_id_env: String,

    /// Environment variable holding the client secret
    pub client_secret_env: String,

    /// Currency code sent with price updates
    pub currency: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://gateway.kinguin.net/sales-manager-api".to_string(),
            token_url: "https://id.kinguin.net/auth/token".to_string(),
            client_id_env: "MARKETPLACE_CLIENT_ID".to_string(),
            client_secret_env: "MARKETPLACE_CLIENT_SECRET".to_string(),
            currency: "EUR".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Competitor page fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScraperConfig {
    /// Base URL used to build product pages from category listings
    pub product_base_url: String,

    /// User agent sent with page requests
    pub user_agent: String,

    /// Attempts per page
    pub max_attempts: u32,

    /// Milliseconds between attempts
    pub retry_delay_ms: u64,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            product_base_url: "https://www.kinguin.net/category".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) repricer/0.1".to_string(),
            max_attempts: 3,
            retry_delay_ms: 5_000,
            timeout_ms: 30_000,
        }
    }
}
