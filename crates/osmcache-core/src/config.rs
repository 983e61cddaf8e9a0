//! Mirror configuration
//!
//! Sources, later ones winning:
//! 1. Built-in defaults (one day max age, public Overpass instance)
//! 2. `~/.config/osmcache/config.toml`, or the file named by `OSMCACHE_CONFIG`
//! 3. `OSMCACHE_*` environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "OSMCACHE";

/// Public Overpass API instance used when no override is configured
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// One day, in seconds
const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60 * 24;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Storage location, table naming and remote refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `osmcache.db`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Prefix for all table names, so the mirror can share a host schema
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Maximum age of a stored element before a read refreshes it
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Whether the remote service may be contacted at all
    #[serde(default = "default_true")]
    pub online: bool,

    /// Overpass endpoint override
    #[serde(default)]
    pub overpass_url: Option<String>,

    /// Fetch a way's nodes / a relation's members along with it on refresh
    #[serde(default = "default_true")]
    pub recursive_refresh: bool,

    /// Upper bound for every remote call
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            table_prefix: default_table_prefix(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            online: true,
            overpass_url: None,
            recursive_refresh: true,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from the default config file plus environment overrides
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (OSMCACHE_DATA_DIR, OSMCACHE_MAX_AGE, ...)
    /// 2. Config file (~/.config/osmcache/config.toml or OSMCACHE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path`, falling back to defaults when it does not exist
    ///
    /// Creates the data directory. Environment overrides still apply.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Parse TOML and apply environment overrides, touching no files
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overwrite fields from `OSMCACHE_*` variables
    fn apply_env_overrides(&mut self) {
        // OSMCACHE_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // OSMCACHE_TABLE_PREFIX
        if let Ok(val) = std::env::var(format!("{}_TABLE_PREFIX", ENV_PREFIX)) {
            self.table_prefix = val;
        }

        // OSMCACHE_MAX_AGE (seconds); unparseable values are ignored
        if let Ok(val) = std::env::var(format!("{}_MAX_AGE", ENV_PREFIX)) {
            if let Ok(secs) = val.trim().parse() {
                self.max_age_secs = secs;
            }
        }

        // OSMCACHE_ONLINE
        if let Ok(val) = std::env::var(format!("{}_ONLINE", ENV_PREFIX)) {
            self.online = parse_flag(&val);
        }

        // OSMCACHE_OVERPASS_URL
        if let Ok(val) = std::env::var(format!("{}_OVERPASS_URL", ENV_PREFIX)) {
            self.overpass_url = if val.is_empty() { None } else { Some(val) };
        }

        // OSMCACHE_RECURSIVE_REFRESH
        if let Ok(val) = std::env::var(format!("{}_RECURSIVE_REFRESH", ENV_PREFIX)) {
            self.recursive_refresh = parse_flag(&val);
        }

        // OSMCACHE_FETCH_TIMEOUT (seconds)
        if let Ok(val) = std::env::var(format!("{}_FETCH_TIMEOUT", ENV_PREFIX)) {
            if let Ok(secs) = val.trim().parse() {
                self.fetch_timeout_secs = secs;
            }
        }
    }

    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
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

    /// `OSMCACHE_CONFIG`, else `<config dir>/osmcache/config.toml`
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("osmcache")
            .join("config.toml")
    }

    /// SQLite database inside `data_dir`
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("osmcache.db")
    }

    /// Staleness threshold for the freshness monitor
    pub fn max_age(&self) -> chrono::Duration {
        // chrono::Duration tops out at i64::MAX milliseconds
        let secs = i64::try_from(self.max_age_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    /// Timeout applied to every remote call
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Overpass endpoint, honouring the override
    pub fn overpass_endpoint(&self) -> &str {
        self.overpass_url.as_deref().unwrap_or(DEFAULT_OVERPASS_URL)
    }
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("osmcache")
}

fn default_table_prefix() -> String {
    "osm_".to_string()
}

fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE_SECS
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Holds the env lock and restores the listed variables on drop
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
        "OSMCACHE_DATA_DIR",
        "OSMCACHE_TABLE_PREFIX",
        "OSMCACHE_MAX_AGE",
        "OSMCACHE_ONLINE",
        "OSMCACHE_OVERPASS_URL",
        "OSMCACHE_RECURSIVE_REFRESH",
        "OSMCACHE_FETCH_TIMEOUT",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.online);
        assert!(config.recursive_refresh);
        assert_eq!(config.table_prefix, "osm_");
        assert_eq!(config.max_age(), chrono::Duration::days(1));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.overpass_endpoint(), DEFAULT_OVERPASS_URL);
        assert!(config.data_dir.ends_with("osmcache"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.sqlite_path().ends_with("osmcache.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OSMCACHE_DATA_DIR", "/tmp/osmcache-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/osmcache-test"));
    }

    #[test]
    fn test_env_override_online() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OSMCACHE_ONLINE", "false");
        config.apply_env_overrides();
        assert!(!config.online);

        env::set_var("OSMCACHE_ONLINE", "1");
        config.apply_env_overrides();
        assert!(config.online);
    }

    #[test]
    fn test_env_override_max_age_ignores_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OSMCACHE_MAX_AGE", "3600");
        config.apply_env_overrides();
        assert_eq!(config.max_age_secs, 3600);

        env::set_var("OSMCACHE_MAX_AGE", "an hour");
        config.apply_env_overrides();
        assert_eq!(config.max_age_secs, 3600);
    }

    #[test]
    fn test_env_override_overpass_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("OSMCACHE_OVERPASS_URL", "http://localhost:12345/api/interpreter");
        config.apply_env_overrides();
        assert_eq!(
            config.overpass_endpoint(),
            "http://localhost:12345/api/interpreter"
        );

        // Empty string clears it
        env::set_var("OSMCACHE_OVERPASS_URL", "");
        config.apply_env_overrides();
        assert!(config.overpass_url.is_none());
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/osm"),
            table_prefix: "mirror_".to_string(),
            max_age_secs: 600,
            online: false,
            overpass_url: Some("https://overpass.example.org/api/interpreter".to_string()),
            recursive_refresh: false,
            fetch_timeout_secs: 5,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("table_prefix"));
        assert!(toml_str.contains("max_age_secs"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.table_prefix, config.table_prefix);
        assert_eq!(parsed.max_age_secs, config.max_age_secs);
        assert_eq!(parsed.online, config.online);
        assert_eq!(parsed.overpass_url, config.overpass_url);
    }

    #[test]
    fn test_load_from_str_fills_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            max_age_secs = 120
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.max_age_secs, 120);
        assert_eq!(config.table_prefix, "osm_");
        assert!(config.online);
        assert!(config.recursive_refresh);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::TempDir::new().unwrap();
        env::set_var("OSMCACHE_DATA_DIR", dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.online);
        assert!(config.data_dir.exists());
    }
}
