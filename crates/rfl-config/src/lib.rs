//! # rfl-config
//!
//! Configuration management for rfl.
//!
//! Loads configuration from:
//! 1. `~/.rfl/config.toml` (global)
//! 2. `.rfl/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
mod size;

pub use size::parse_byte_size;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Default shared cache root before `~` expansion
pub const DEFAULT_CACHE_PATH: &str = "~/.rfl/cache";

/// Directory name used for the server blob cache inside a repository
pub const DEFAULT_SERVER_CACHE_DIR: &str = "remotefilelogcache";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid byte size: {0}")]
    ByteSize(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub client: ClientConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(&project_path)?;
            config.merge(project_config);
        }

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.rfl/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".rfl/config.toml"))
    }

    /// Project config path: .rfl/config.toml
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".rfl/config.toml")
    }

    /// Merge a project config over this one. Only values that differ from the
    /// defaults take effect.
    fn merge(&mut self, other: Config) {
        let cache_default = CacheConfig::default();
        if other.cache.path != cache_default.path {
            self.cache.path = other.cache.path;
        }
        if other.cache.group.is_some() {
            self.cache.group = other.cache.group;
        }
        if other.cache.limit != cache_default.limit {
            self.cache.limit = other.cache.limit;
        }
        if other.cache.validate {
            self.cache.validate = true;
        }
        if other.cache.validate_log.is_some() {
            self.cache.validate_log = other.cache.validate_log;
        }

        let client_default = ClientConfig::default();
        if other.client.cache_process.is_some() {
            self.client.cache_process = other.client.cache_process;
        }
        if other.client.fallback_path.is_some() {
            self.client.fallback_path = other.client.fallback_path;
        }
        if !other.client.repo_name.is_empty() {
            self.client.repo_name = other.client.repo_name;
        }
        if other.client.batch_size != client_default.batch_size {
            self.client.batch_size = other.client.batch_size;
        }
        if other.client.debug {
            self.client.debug = true;
        }
        if other.client.skip_files != client_default.skip_files {
            self.client.skip_files = other.client.skip_files;
        }

        let server_default = ServerConfig::default();
        if other.server.enabled {
            self.server.enabled = true;
        }
        if other.server.cache_path.is_some() {
            self.server.cache_path = other.server.cache_path;
        }
        if other.server.expiration_days != server_default.expiration_days {
            self.server.expiration_days = other.server.expiration_days;
        }
        if other.server.precompute_limit != server_default.precompute_limit {
            self.server.precompute_limit = other.server.precompute_limit;
        }
        if other.server.validate {
            self.server.validate = true;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RFL_CACHE_PATH") {
            self.cache.path = PathBuf::from(path);
        }
        if let Ok(command) = std::env::var("RFL_CACHE_PROCESS") {
            self.client.cache_process = Some(command).filter(|c| !c.is_empty());
        }
        if let Ok(fallback) = std::env::var("RFL_FALLBACK_PATH") {
            self.client.fallback_path = Some(fallback).filter(|f| !f.is_empty());
        }
        if let Ok(name) = std::env::var("RFL_REPO_NAME") {
            self.client.repo_name = name;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Shared cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared cache root directory
    pub path: PathBuf,
    /// Group that owns newly created cache directories
    pub group: Option<String>,
    /// Size the cache is trimmed to by gc, e.g. "50 GB"
    pub limit: String,
    /// Structurally check entries on every write and read
    pub validate: bool,
    /// Where validation failures are appended
    pub validate_log: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CACHE_PATH),
            group: None,
            limit: "1000 GB".to_string(),
            validate: false,
            validate_log: None,
        }
    }
}

impl CacheConfig {
    /// Cache root with `~` expanded
    pub fn root(&self) -> PathBuf {
        expand_home(&self.path)
    }

    pub fn limit_bytes(&self) -> Result<u64, ConfigError> {
        parse_byte_size(&self.limit)
    }
}

/// Fetch client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Command that starts the shared cache daemon; the cache root is appended
    pub cache_process: Option<String>,
    /// Command that opens a stream to the upstream file server
    pub fallback_path: Option<String>,
    /// Namespace for this repository's keys in the shared cache
    pub repo_name: String,
    /// Upstream requests per round
    pub batch_size: usize,
    /// Print fetch statistics when the client closes
    pub debug: bool,
    /// Paths that are never fetched
    pub skip_files: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_process: None,
            fallback_path: None,
            repo_name: String::new(),
            batch_size: 10_000,
            debug: false,
            skip_files: vec![".hgtags".to_string()],
        }
    }
}

/// File server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve file blobs to shallow clients
    pub enabled: bool,
    /// Blob cache root (None = `<repo>/remotefilelogcache`)
    pub cache_path: Option<PathBuf>,
    /// Unreachable blobs older than this are removed by server gc
    pub expiration_days: u64,
    /// Blobs precomputed per incoming commit
    pub precompute_limit: usize,
    /// Check cached blobs before serving them
    pub validate: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_path: None,
            expiration_days: 30,
            precompute_limit: 500,
            validate: false,
        }
    }
}

impl ServerConfig {
    /// Blob cache root for the repository at `repo_path`
    pub fn cache_root(&self, repo_path: &Path) -> PathBuf {
        match &self.cache_path {
            Some(path) => expand_home(path),
            None => repo_path.join(DEFAULT_SERVER_CACHE_DIR),
        }
    }
}
