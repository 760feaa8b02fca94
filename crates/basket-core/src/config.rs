//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/basket/config.toml)
//! 3. Environment variables (BASKET_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::notify::SettleDelays;

/// Environment variable prefix
const ENV_PREFIX: &str = "BASKET";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Session user; required by commands that touch lists
    #[serde(default)]
    pub user: Option<String>,

    /// Settle delay before refreshing after an item change
    #[serde(default = "default_item_settle_ms")]
    pub item_settle_ms: u64,

    /// Settle delay before refreshing after a list change
    #[serde(default = "default_list_settle_ms")]
    pub list_settle_ms: u64,

    /// Deadline for each remote call; 0 disables it
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            user: None,
            item_settle_ms: default_item_settle_ms(),
            list_settle_ms: default_list_settle_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (BASKET_DATA_DIR, BASKET_USER, ...)
    /// 2. Config file (~/.config/basket/config.toml or BASKET_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from an explicit path if given, else the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // BASKET_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // BASKET_USER
        if let Ok(val) = std::env::var(format!("{}_USER", ENV_PREFIX)) {
            self.user = if val.is_empty() { None } else { Some(val) };
        }

        // BASKET_LOG_FILE
        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Some(ms) = env_u64("ITEM_SETTLE_MS")? {
            self.item_settle_ms = ms;
        }
        if let Some(ms) = env_u64("LIST_SETTLE_MS")? {
            self.list_settle_ms = ms;
        }
        if let Some(secs) = env_u64("REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = secs;
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with BASKET_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("basket")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("basket.db")
    }

    pub fn settle_delays(&self) -> SettleDelays {
        SettleDelays {
            items: Duration::from_millis(self.item_settle_ms),
            lists: Duration::from_millis(self.list_settle_ms),
        }
    }

    /// Per-call deadline, if enabled
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn env_u64(suffix: &str) -> Result<Option<u64>> {
    let name = format!("{}_{}", ENV_PREFIX, suffix);
    match std::env::var(&name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a non-negative integer, got {:?}", name, val)),
        Err(_) => Ok(None),
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("basket")
}

fn default_item_settle_ms() -> u64 {
    50
}

fn default_list_settle_ms() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "BASKET_DATA_DIR",
        "BASKET_USER",
        "BASKET_LOG_FILE",
        "BASKET_ITEM_SETTLE_MS",
        "BASKET_LIST_SETTLE_MS",
        "BASKET_REQUEST_TIMEOUT_SECS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.user.is_none());
        assert!(config.data_dir.ends_with("basket"));
        assert!(config.database_path().ends_with("basket.db"));

        let delays = config.settle_delays();
        assert_eq!(delays.items, Duration::from_millis(50));
        assert_eq!(delays.lists, Duration::from_millis(100));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("BASKET_DATA_DIR", "/tmp/basket-test");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/basket-test"));
    }

    #[test]
    fn test_env_override_user() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BASKET_USER", "alice");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.user.as_deref(), Some("alice"));

        // Empty string clears it
        env::set_var("BASKET_USER", "");
        config.apply_env_overrides().unwrap();
        assert!(config.user.is_none());
    }

    #[test]
    fn test_env_override_delays() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BASKET_ITEM_SETTLE_MS", "5");
        env::set_var("BASKET_LIST_SETTLE_MS", " 7 ");
        env::set_var("BASKET_REQUEST_TIMEOUT_SECS", "0");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.settle_delays().items, Duration::from_millis(5));
        assert_eq!(config.settle_delays().lists, Duration::from_millis(7));
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BASKET_ITEM_SETTLE_MS", "soon");
        let err = config.apply_env_overrides().unwrap_err();
        assert!(err.to_string().contains("BASKET_ITEM_SETTLE_MS"));
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            user = "bob"
            list_settle_ms = 250
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.user.as_deref(), Some("bob"));
        assert_eq!(config.list_settle_ms, 250);
        assert_eq!(config.item_settle_ms, 50);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = Config {
            data_dir: temp.path().join("data"),
            user: Some("carol".to_string()),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.user.as_deref(), Some("carol"));
        assert_eq!(loaded.data_dir, temp.path().join("data"));
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = TempDir::new().unwrap();
        env::set_var("BASKET_DATA_DIR", temp.path().join("data"));

        let config = Config::load_from_path(&temp.path().join("missing.toml")).unwrap();
        assert!(config.user.is_none());
        assert_eq!(config.item_settle_ms, 50);
    }
}
