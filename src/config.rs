// Server configuration: optional TOML file, then environment overrides

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::gating::{ModuleRegistry, RegistryError};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MODULE_STORE_CONFIG";
pub const BIND_ENV: &str = "MODULE_STORE_BIND";
pub const DB_ENV: &str = "MODULE_STORE_DB";
pub const TOKENS_ENV: &str = "MODULE_STORE_TOKENS";
pub const SEED_ENV: &str = "MODULE_STORE_SEED";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Bearer tokens accepted on `/api/modules`. Empty rejects every request.
    #[serde(default)]
    pub api_tokens: Vec<String>,
    #[serde(default = "default_seed_catalog")]
    pub seed_catalog: bool,
    /// Registry manifest (JSON or TOML); the built-in one when unset
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5001))
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("module-store")
        .join("licenses.db")
}

fn default_seed_catalog() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            database_path: default_database_path(),
            api_tokens: Vec::new(),
            seed_catalog: default_seed_catalog(),
            manifest_path: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Resolve the full configuration.
    ///
    /// The file comes from `config_path`, else `MODULE_STORE_CONFIG`, else
    /// defaults are used. Environment overrides are applied last.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match config_path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `MODULE_STORE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind = bind.parse().map_err(|_| ConfigError::InvalidValue {
                key: BIND_ENV.to_string(),
                value: bind.clone(),
            })?;
        }

        if let Some(db) = lookup(DB_ENV) {
            self.database_path = PathBuf::from(db);
        }

        if let Some(tokens) = lookup(TOKENS_ENV) {
            self.api_tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(seed) = lookup(SEED_ENV) {
            self.seed_catalog = parse_flag(&seed).ok_or_else(|| ConfigError::InvalidValue {
                key: SEED_ENV.to_string(),
                value: seed.clone(),
            })?;
        }

        Ok(())
    }

    /// Module registry for the manifest endpoint
    pub fn registry(&self) -> Result<ModuleRegistry, RegistryError> {
        match &self.manifest_path {
            Some(path) => ModuleRegistry::load(path),
            None => ModuleRegistry::builtin(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
