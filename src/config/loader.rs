//! Configuration Loader
//!
//! Merges built-in defaults, an optional TOML file, and `FLEET__SECTION__KEY`
//! environment variables with the `config` crate, then validates the result.

use config::{Config, Environment, File, FileFormat, Map};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::FleetConfig;

/// Environment variable naming the config file used by [`ConfigManager::load`].
pub const CONFIG_PATH_ENV: &str = "FLEET_CONFIG_PATH";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: FleetConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load from the file named by `FLEET_CONFIG_PATH`, if set.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from_file(path.as_deref())
    }

    pub fn load_from_file(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process
    /// environment. `None` reads the process environment.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&FleetConfig::default())?);

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigurationError::config_file_not_found(vec![
                    path.to_path_buf()
                ]));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: FleetConfig = builder.build()?.try_deserialize()?;
        Self::from_config_at(config, path.map(Path::to_path_buf))
    }

    /// Wrap an in-memory configuration, validating it.
    pub fn from_config(config: FleetConfig) -> ConfigResult<Self> {
        Self::from_config_at(config, None)
    }

    fn from_config_at(config: FleetConfig, source: Option<PathBuf>) -> ConfigResult<Self> {
        config.validate()?;
        let environment = crate::logging::get_environment();

        info!(
            environment = %environment,
            node_id = %config.leadership.node_id,
            source = ?source,
            "⚙️ CONFIG: Configuration loaded"
        );

        Ok(Self {
            config,
            environment,
            source,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn into_config(self) -> FleetConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Effective configuration as JSON, for diagnostics.
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}
