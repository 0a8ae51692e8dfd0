//! CLI configuration.
//!
//! Resolved in this order: `--config`, then `DIRGATE_CONFIG`, then
//! `<config dir>/dirgate/config.toml`. A missing file means defaults.
//! `DIRGATE_REDIS_URL`, `DIRGATE_LOG_LEVEL`, and `DIRGATE_STORE_PATH`
//! override the file.

use dirgate_acl::{AclConfig, CacheConfig, EngineConfig, GuardConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DIRGATE_CONFIG";

/// Definition store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Definitions file; defaults to `<data dir>/dirgate/definitions.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Cache settings plus where the cache lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliCacheConfig {
    /// Redis URL; an in-process cache is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// Cache tunables.
    #[serde(flatten)]
    pub settings: CacheConfig,
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirgateConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Store section.
    pub store: StoreConfig,
    /// Cache section.
    pub cache: CliCacheConfig,
    /// Guard section.
    pub guard: GuardConfig,
    /// Engine section.
    pub engine: EngineConfig,
}

impl Default for DirgateConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store: StoreConfig::default(),
            cache: CliCacheConfig::default(),
            guard: GuardConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl DirgateConfig {
    /// Platform default config file location.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dirgate").join("config.toml"))
    }

    /// Picks the config file: explicit path, then `env_path`, then the
    /// platform default.
    pub fn resolve_config_path_with(
        explicit: Option<&str>,
        env_path: Option<String>,
    ) -> Option<PathBuf> {
        explicit
            .map(PathBuf::from)
            .or_else(|| env_path.filter(|p| !p.is_empty()).map(PathBuf::from))
            .or_else(Self::default_config_path)
    }

    /// Picks the config file, reading `DIRGATE_CONFIG` from the environment.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        Self::resolve_config_path_with(explicit, std::env::var(CONFIG_ENV).ok())
    }

    /// Loads the resolved file (or defaults) and applies env overrides.
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit) {
            Some(path) if path.exists() => {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| Error::io_with_path(e, &path))?;
                Self::from_toml_str(&content)
                    .map_err(|e| Error::config(format!("{}: {e}", path.display())))?
            }
            Some(path) if explicit.is_some() => {
                return Err(Error::config(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            _ => Self::default(),
        };
        config.apply_env(std::env::vars());
        Ok(config)
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Renders the config as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Applies the `DIRGATE_*` overrides found in `vars`.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "DIRGATE_REDIS_URL" => self.cache.redis_url = Some(value),
                "DIRGATE_LOG_LEVEL" => self.log_level = value,
                "DIRGATE_STORE_PATH" => self.store.path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }

    /// Definitions file to open.
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("dirgate"))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("definitions.json")
        })
    }

    /// Settings for the ACL engine.
    pub fn acl_config(&self) -> AclConfig {
        AclConfig {
            cache: self.cache.settings.clone(),
            guard: self.guard.clone(),
            engine: self.engine.clone(),
        }
    }
}
