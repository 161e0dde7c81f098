// src/config.rs

//! Runtime configuration
//!
//! Settings live in the options table of the state database rather than in
//! a config file. Missing options take their defaults; command-line flags
//! may override the loaded values for a single invocation.

use crate::error::{Error, Result};
use crate::store::OptionStore;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the remote release index
pub const DEFAULT_INDEX_URL: &str = "https://raw.githubusercontent.com/gitpress/index/main";

/// Default latest-version cache lifetime (6 hours)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Default elapsed-time budget for one update run
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(30);

/// Default WP-CLI executable
pub const DEFAULT_WP_CLI: &str = "wp";

/// Default state database path
pub const DEFAULT_DB_PATH: &str = "/var/lib/gitpress/gitpress.db";

/// Option names accepted by [`Config::set`]
pub const KEYS: &[&str] = &[
    "index_url",
    "disable_fallback",
    "cache_ttl",
    "time_budget",
    "wp_cli",
    "scratch_dir",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the release index
    pub index_url: String,
    /// Skip the native updater when the primary pipeline fails
    pub disable_fallback: bool,
    /// Lifetime of cached latest-version lookups
    pub cache_ttl: Duration,
    /// Elapsed-time budget checked between update phases
    pub time_budget: Duration,
    /// WP-CLI executable used by the fallback
    pub wp_cli: String,
    /// Where archives are downloaded and unpacked
    pub scratch_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            disable_fallback: false,
            cache_ttl: DEFAULT_CACHE_TTL,
            time_budget: DEFAULT_TIME_BUDGET,
            wp_cli: DEFAULT_WP_CLI.to_string(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "{} must be a boolean, got {:?}",
            key, value
        ))),
    }
}

/// Longest accepted duration setting (10 years)
pub const MAX_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    let secs = value.trim().parse::<u64>().map_err(|_| {
        Error::ConfigError(format!(
            "{} must be a number of seconds, got {:?}",
            key, value
        ))
    })?;
    if secs > MAX_SECONDS {
        return Err(Error::ConfigError(format!(
            "{} must be at most {} seconds, got {}",
            key, MAX_SECONDS, secs
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_url(key: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(Error::ConfigError(format!(
            "{} must be an http(s) URL, got {:?}",
            key, value
        )))
    }
}

fn parse_dir(key: &str, value: &str) -> Result<PathBuf> {
    let path = PathBuf::from(value.trim());
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(Error::ConfigError(format!(
            "{} must be an absolute path, got {:?}",
            key, value
        )))
    }
}

impl Config {
    /// Load settings from the option store
    pub fn load(store: &dyn OptionStore) -> Result<Self> {
        let mut config = Self::default();
        for key in KEYS {
            if let Some(value) = store.get_option(key)? {
                config.apply(key, &value)?;
            }
        }
        Ok(config)
    }

    /// Apply one textual setting
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "index_url" => self.index_url = parse_url(key, value)?,
            "disable_fallback" => self.disable_fallback = parse_bool(key, value)?,
            "cache_ttl" => self.cache_ttl = parse_seconds(key, value)?,
            "time_budget" => self.time_budget = parse_seconds(key, value)?,
            "wp_cli" => {
                if value.trim().is_empty() {
                    return Err(Error::ConfigError("wp_cli must not be empty".to_string()));
                }
                self.wp_cli = value.trim().to_string();
            }
            "scratch_dir" => self.scratch_dir = parse_dir(key, value)?,
            _ => {
                return Err(Error::ConfigError(format!(
                    "Unknown setting {:?} (expected one of: {})",
                    key,
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Validate and persist one setting
    pub fn set(store: &dyn OptionStore, key: &str, value: &str) -> Result<()> {
        Self::default().apply(key, value)?;
        store.set_option(key, value.trim())
    }

    /// Remove a persisted setting so its default applies again
    pub fn unset(store: &dyn OptionStore, key: &str) -> Result<()> {
        if !KEYS.contains(&key) {
            return Err(Error::ConfigError(format!("Unknown setting {:?}", key)));
        }
        store.delete_option(key)
    }

    /// Current value of a setting as text
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "index_url" => Some(self.index_url.clone()),
            "disable_fallback" => Some(self.disable_fallback.to_string()),
            "cache_ttl" => Some(self.cache_ttl.as_secs().to_string()),
            "time_budget" => Some(self.time_budget.as_secs().to_string()),
            "wp_cli" => Some(self.wp_cli.clone()),
            "scratch_dir" => Some(self.scratch_dir.display().to_string()),
            _ => None,
        }
    }
}

/// Update log location inside a WordPress installation
pub fn default_log_path(root: &Path) -> PathBuf {
    root.join("wp-content/uploads/gitpress-update.log")
}

/// Scratch directory for archives and extraction
pub fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("gitpress")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_load_defaults() {
        let store = MemoryStore::new();
        assert_eq!(Config::load(&store).unwrap(), Config::default());
    }

    #[test]
    fn test_load_stored_values() {
        let store = MemoryStore::new();
        Config::set(&store, "disable_fallback", "yes").unwrap();
        Config::set(&store, "cache_ttl", "60").unwrap();
        Config::set(&store, "index_url", "https://index.example.com/").unwrap();

        let config = Config::load(&store).unwrap();
        assert!(config.disable_fallback);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.index_url, "https://index.example.com");
        assert_eq!(config.time_budget, DEFAULT_TIME_BUDGET);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let store = MemoryStore::new();
        assert!(Config::set(&store, "cache_ttl", "soon").is_err());
        assert!(Config::set(&store, "disable_fallback", "maybe").is_err());
        assert!(Config::set(&store, "index_url", "ftp://x").is_err());
        assert!(Config::set(&store, "colour", "blue").is_err());
        assert!(store.list_options().unwrap().is_empty());
    }

    #[test]
    fn test_set_rejects_out_of_range_durations() {
        let store = MemoryStore::new();
        assert!(Config::set(&store, "cache_ttl", "9223372036854775000").is_err());
        assert!(Config::set(&store, "cache_ttl", &u64::MAX.to_string()).is_err());
        assert!(Config::set(&store, "time_budget", &(MAX_SECONDS + 1).to_string()).is_err());
        assert!(store.list_options().unwrap().is_empty());

        Config::set(&store, "cache_ttl", &MAX_SECONDS.to_string()).unwrap();
        assert_eq!(
            Config::load(&store).unwrap().cache_ttl,
            Duration::from_secs(MAX_SECONDS)
        );
    }

    #[test]
    fn test_unset_restores_default() {
        let store = MemoryStore::new();
        Config::set(&store, "time_budget", "90").unwrap();
        Config::unset(&store, "time_budget").unwrap();
        assert_eq!(Config::load(&store).unwrap().time_budget, DEFAULT_TIME_BUDGET);
        assert!(Config::unset(&store, "colour").is_err());
    }

    #[test]
    fn test_get_renders_values() {
        let config = Config::default();
        assert_eq!(config.get("cache_ttl").as_deref(), Some("21600"));
        assert_eq!(config.get("disable_fallback").as_deref(), Some("false"));
        assert_eq!(config.get("colour"), None);
    }

    #[test]
    fn test_scratch_dir_setting() {
        let store = MemoryStore::new();
        assert_eq!(Config::load(&store).unwrap().scratch_dir, default_scratch_dir());

        assert!(Config::set(&store, "scratch_dir", "relative/dir").is_err());
        assert!(Config::set(&store, "scratch_dir", "  ").is_err());

        Config::set(&store, "scratch_dir", "/var/tmp/gitpress").unwrap();
        let config = Config::load(&store).unwrap();
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/gitpress"));
        assert_eq!(config.get("scratch_dir").as_deref(), Some("/var/tmp/gitpress"));

        Config::unset(&store, "scratch_dir").unwrap();
        assert_eq!(Config::load(&store).unwrap().scratch_dir, default_scratch_dir());
    }

    #[test]
    fn test_default_log_path() {
        assert_eq!(
            default_log_path(Path::new("/srv/www")),
            PathBuf::from("/srv/www/wp-content/uploads/gitpress-update.log")
        );
    }
}
