//! Configuration for wardenctl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use warden_executor::InstallerConfig;
use warden_guard::GuardConfig;
use warden_intent::ClassifierConfig;
use warden_policy::{GrantSource, PolicyError, PolicyResult, RoleCatalog, RoleDefinition};

pub const DEFAULT_CONFIG_PATH: &str = "config/warden.toml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub installer: InstallerConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    /// Role hierarchy and direct grants. Empty means the stock engineering
    /// ladder.
    #[serde(default)]
    pub roles: Vec<RoleDefinition>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage; history is lost when the process exits
    Memory,

    /// SQLite database file
    Sqlite {
        #[serde(default = "default_database_path")]
        path: PathBuf,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_database_path(),
            max_connections: default_pool_size(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("warden.db")
}

fn default_pool_size() -> u32 {
    4
}

impl WardenConfig {
    /// Layer defaults, the optional file and `WARDEN_` environment
    /// variables (`WARDEN_INSTALLER__TIMEOUT_SECS=600`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&WardenConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn role_catalog(&self) -> RoleCatalog {
        if self.roles.is_empty() {
            RoleCatalog::engineering_ladder()
        } else {
            RoleCatalog::new(self.roles.clone())
        }
    }
}

/// Grant source backed by the `roles` table of the config file. Every load
/// re-reads the file, so a reload picks up edits.
#[derive(Debug, Clone)]
pub struct ConfigGrantSource {
    path: Option<PathBuf>,
}

impl ConfigGrantSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl GrantSource for ConfigGrantSource {
    fn load_grants(&self) -> PolicyResult<RoleCatalog> {
        let path = self.path.as_deref().and_then(|p| p.to_str());
        let config = WardenConfig::load(path).map_err(|e| PolicyError::Source(e.to_string()))?;
        Ok(config.role_catalog())
    }
}
