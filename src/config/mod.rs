//! Configuration types for the offline cache agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the cache bucket populated on install.
pub const CACHE_NAME: &str = "anti-procrastination-v1";

/// Assets pre-cached on install, in order.
pub const PRECACHE_ASSETS: [&str; 4] = [
    "/",
    "/static/manifest.json",
    "https://cdn.tailwindcss.com",
    "https://unpkg.com/lucide@latest/dist/umd/lucide.js",
];

/// Origin the page is served from; relative assets resolve against it.
pub const DEFAULT_ORIGIN: &str = "http://localhost:5000";

/// Configuration for the cache agent itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the bucket the install step populates.
    pub cache_name: String,
    /// URLs to pre-cache. Relative entries resolve against `origin`.
    pub assets: Vec<String>,
    /// Origin of the controlled page.
    pub origin: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            assets: PRECACHE_ASSETS.iter().map(ToString::to_string).collect(),
            origin: DEFAULT_ORIGIN.to_string(),
        }
    }
}

impl AgentConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bucket name.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Replaces the pre-cache asset list.
    #[must_use]
    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the origin relative assets resolve against.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// Settings for the live network client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seconds an idle pooled connection is kept.
    pub pool_idle_timeout_secs: u64,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// TCP keepalive interval in seconds.
    pub tcp_keepalive_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: 60,
            pool_max_idle_per_host: 8,
            tcp_keepalive_secs: 30,
            user_agent: format!("offline-cache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub const fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    #[must_use]
    pub const fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }
}

/// Path configuration for cache storage and config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory holding one subdirectory per cache bucket.
    pub storage_dir: PathBuf,
    /// Directory where the configuration file is read from.
    pub config_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            storage_dir: data_dir.join("offline-cache").join("buckets"),
            config_dir: config_dir.join("offline-cache"),
        }
    }
}

impl PathConfig {
    /// Location of `config.toml` inside the config directory.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Agent configuration.
    pub agent: AgentConfig,
    /// Network client configuration.
    pub network: NetworkConfig,
    /// Path configuration.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the default config file, or defaults if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> crate::Result<Self> {
        let path = PathConfig::default().config_file();
        if path.exists() {
            Self::load_from(&path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Loads configuration from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Saves the configuration atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string_pretty(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
