use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::CadenceConfig;

/// Loads the Cadence configuration.
pub struct ConfigLoader {
    config: CadenceConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CADENCE_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
            .join("cadence.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> cadence_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            CadenceConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    /// The loaded config.
    pub fn get(&self) -> &CadenceConfig {
        &self.config
    }

    /// Path the config was resolved to. It may not exist when defaults are in use.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply process env var overrides (CADENCE_AGENT_MODEL, CADENCE_MAX_RETRIES, ...).
    fn apply_env_overrides(config: CadenceConfig) -> CadenceConfig {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Unparseable numeric values are
    /// ignored with a warning.
    pub fn apply_overrides_from<F>(mut config: CadenceConfig, lookup: F) -> CadenceConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CADENCE_AGENT_MODEL") {
            config.agent.model = v;
        }
        if let Some(v) = lookup("CADENCE_MAX_RETRIES") {
            match v.parse::<u32>() {
                Ok(n) => config.orchestrator.max_retries = n,
                Err(_) => warn!(value = %v, "ignoring non-numeric CADENCE_MAX_RETRIES"),
            }
        }
        if let Some(v) = lookup("CADENCE_MAX_STEPS") {
            match v.parse::<u32>() {
                Ok(n) => config.orchestrator.max_steps = n,
                Err(_) => warn!(value = %v, "ignoring non-numeric CADENCE_MAX_STEPS"),
            }
        }
        if let Some(v) = lookup("CADENCE_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("CADENCE_DB_PATH") {
            config.memory.db_path = PathBuf::from(v);
        }
        // Config file takes priority for the key; env is the fallback.
        if config.services.openai_api_key.is_none() {
            config.services.openai_api_key = lookup("OPENAI_API_KEY");
        }
        config
    }

    fn read_file(path: &Path) -> cadence_core::Result<CadenceConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<CadenceConfig>(&raw).map_err(|e| {
            cadence_core::CadenceError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    fn check(config: &CadenceConfig) -> cadence_core::Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(cadence_core::CadenceError::Config(e)),
        }
    }
}
