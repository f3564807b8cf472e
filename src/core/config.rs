//! Application configuration management
//!
//! Settings live in `config.toml` under the platform config directory and
//! can be overridden per process with `VOXTASK_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::retry::RetryPolicy;
use crate::core::session::SessionTiming;
use crate::core::store::{FileStore, KeyringStore, MemoryStore, SessionStore};
use crate::error::{Result, VoxtaskError};

/// Where the session is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// System keyring (default)
    #[default]
    Keyring,
    /// JSON file in the config directory
    File,
    /// Process memory; nothing survives exit
    Memory,
}

impl StoreKind {
    /// Config file spelling
    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::Keyring => "keyring",
            StoreKind::File => "file",
            StoreKind::Memory => "memory",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Some(StoreKind::Keyring),
            "file" => Some(StoreKind::File),
            "memory" => Some(StoreKind::Memory),
            _ => None,
        }
    }

    /// Get all store kinds
    pub fn all() -> &'static [StoreKind] {
        &[StoreKind::Keyring, StoreKind::File, StoreKind::Memory]
    }

    /// Open the backing store
    pub fn open(&self) -> Result<Box<dyn SessionStore>> {
        Ok(match self {
            StoreKind::Keyring => Box::new(KeyringStore::new()),
            StoreKind::File => Box::new(FileStore::in_dir(&Config::config_dir()?)),
            StoreKind::Memory => Box::new(MemoryStore::new()),
        })
    }
}

impl StoreKind {
    /// Where task history files go; `None` keeps history in memory
    pub fn history_dir(&self) -> Result<Option<PathBuf>> {
        match self {
            StoreKind::Memory => Ok(None),
            StoreKind::Keyring | StoreKind::File => Config::config_dir().map(Some),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Keys accepted by `voxtask config set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// `api_base_url`
    ApiUrl,
    /// `request_timeout_ms`
    TimeoutMs,
    /// `retry_attempts`
    RetryAttempts,
    /// `retry_base_delay_ms`
    RetryDelayMs,
    /// `refresh_warning_secs`
    RefreshWarningSecs,
    /// `refresh_auto_secs`
    RefreshAutoSecs,
    /// `expiry_check_interval_secs`
    CheckIntervalSecs,
    /// `store`
    Store,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Total attempts per call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff base in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Warn when the credential expires within this many seconds
    #[serde(default = "default_refresh_warning_secs")]
    pub refresh_warning_secs: u64,

    /// Refresh proactively when the credential expires within this many seconds
    #[serde(default = "default_refresh_auto_secs")]
    pub refresh_auto_secs: u64,

    /// Expiry monitor period in seconds
    #[serde(default = "default_expiry_check_interval_secs")]
    pub expiry_check_interval_secs: u64,

    /// Session storage backend
    #[serde(default)]
    pub store: StoreKind,
}

fn default_api_base_url() -> String {
    "http://localhost:2411".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_refresh_warning_secs() -> u64 {
    5 * 60
}

fn default_refresh_auto_secs() -> u64 {
    2 * 60
}

fn default_expiry_check_interval_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            refresh_warning_secs: default_refresh_warning_secs(),
            refresh_auto_secs: default_refresh_auto_secs(),
            expiry_check_interval_secs: default_expiry_check_interval_secs(),
            store: StoreKind::default(),
        }
    }
}

impl Config {
    /// Load configuration from file (or defaults), then apply environment
    /// overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from file only, or create default if not exists
    pub fn load_file() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the configuration directory
    pub fn config_dir() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "voxtask", "voxtask")
            .ok_or_else(|| VoxtaskError::Config("Could not determine config directory".into()))?;

        Ok(project_dirs.config_dir().to_path_buf())
    }

    /// Apply `VOXTASK_*` overrides looked up through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = [
            ("VOXTASK_API_URL", ConfigKey::ApiUrl),
            ("VOXTASK_TIMEOUT_MS", ConfigKey::TimeoutMs),
            ("VOXTASK_RETRY_ATTEMPTS", ConfigKey::RetryAttempts),
            ("VOXTASK_RETRY_DELAY_MS", ConfigKey::RetryDelayMs),
            ("VOXTASK_REFRESH_WARNING_SECS", ConfigKey::RefreshWarningSecs),
            ("VOXTASK_REFRESH_AUTO_SECS", ConfigKey::RefreshAutoSecs),
            ("VOXTASK_CHECK_INTERVAL_SECS", ConfigKey::CheckIntervalSecs),
            ("VOXTASK_STORE", ConfigKey::Store),
        ];
        for (var, key) in overrides {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                self.set(key, &value)
                    .map_err(|e| VoxtaskError::Config(format!("{}: {}", var, e)))?;
            }
        }
        Ok(())
    }

    /// Set one key from its string form
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            ConfigKey::ApiUrl => {
                url::Url::parse(value).map_err(|e| {
                    VoxtaskError::InvalidInput(format!("Invalid URL '{}': {}", value, e))
                })?;
                self.api_base_url = value.to_string();
            }
            ConfigKey::TimeoutMs => self.request_timeout_ms = parse_number(value, 1)?,
            ConfigKey::RetryAttempts => self.retry_attempts = parse_number(value, 1)?,
            ConfigKey::RetryDelayMs => self.retry_base_delay_ms = parse_number(value, 0)?,
            ConfigKey::RefreshWarningSecs => self.refresh_warning_secs = parse_number(value, 0)?,
            ConfigKey::RefreshAutoSecs => self.refresh_auto_secs = parse_number(value, 0)?,
            ConfigKey::CheckIntervalSecs => {
                self.expiry_check_interval_secs = parse_number(value, 1)?
            }
            ConfigKey::Store => {
                self.store = StoreKind::parse(value).ok_or_else(|| {
                    VoxtaskError::InvalidInput(format!(
                        "Invalid store '{}'. Available stores: {}",
                        value,
                        StoreKind::all()
                            .iter()
                            .map(|s| s.name())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                })?;
            }
        }
        if self.refresh_auto_secs > self.refresh_warning_secs {
            warn!(
                auto = self.refresh_auto_secs,
                warning = self.refresh_warning_secs,
                "auto-refresh window is wider than the warning window"
            );
        }
        Ok(())
    }

    /// Backoff policy for API calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Per-attempt request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Expiry monitor thresholds
    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            warn_threshold: Duration::from_secs(self.refresh_warning_secs),
            auto_refresh_threshold: Duration::from_secs(self.refresh_auto_secs),
            check_interval: Duration::from_secs(self.expiry_check_interval_secs),
        }
    }
}

fn parse_number<T>(value: &str, min: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    match value.parse::<T>() {
        Ok(n) if n >= min => Ok(n),
        _ => Err(VoxtaskError::InvalidInput(format!(
            "Expected a whole number of at least {}, got '{}'",
            min, value
        ))),
    }
}
