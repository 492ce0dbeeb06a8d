//! Reading [`AppConfig`] from files, strings and `DOCFLOW_*` variables

use crate::{AppConfig, ConfigError, Result};
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

/// Prefix of the environment overrides, e.g. `DOCFLOW_CASCADE__HOLD_TERMINAL_HOURS=96`
pub const ENV_PREFIX: &str = "DOCFLOW";

/// Serialization format of a config source, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Toml,
    Yaml,
    Json,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(SourceFormat::Toml),
            Some("yaml" | "yml") => Ok(SourceFormat::Yaml),
            Some("json") => Ok(SourceFormat::Json),
            Some(other) => Err(ConfigError::LoadError(format!(
                "unsupported config format `.{other}` for {}",
                path.display()
            ))),
            None => Err(ConfigError::LoadError(format!(
                "cannot tell the config format of {}",
                path.display()
            ))),
        }
    }

    fn file_format(self) -> FileFormat {
        match self {
            SourceFormat::Toml => FileFormat::Toml,
            SourceFormat::Yaml => FileFormat::Yaml,
            SourceFormat::Json => FileFormat::Json,
        }
    }
}

/// Entry points for loading the engine configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Parse a whole file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let format = SourceFormat::from_path(path)?;
        let raw = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), format = ?format, "Reading config file");

        match format {
            SourceFormat::Toml => Self::from_toml(&raw),
            SourceFormat::Yaml => Self::from_yaml(&raw),
            SourceFormat::Json => Self::from_json(&raw),
        }
    }

    pub fn from_toml(raw: &str) -> Result<AppConfig> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_yaml(raw: &str) -> Result<AppConfig> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_json(raw: &str) -> Result<AppConfig> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Defaults overridden by `DOCFLOW_*` variables
    pub fn from_env() -> Result<AppConfig> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Defaults overridden by `{prefix}_SECTION__KEY` variables,
    /// e.g. `DOCFLOW_WORKFLOW__PASSING_SCORE=90`
    pub fn from_env_with_prefix(prefix: &str) -> Result<AppConfig> {
        Self::builder().add_env(prefix).build()
    }

    /// Section-wise overlay: any overlay section that differs from its
    /// default replaces the base section wholesale
    pub fn merge(base: AppConfig, overlay: AppConfig) -> AppConfig {
        fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
            if overlay == default {
                base
            } else {
                overlay
            }
        }

        let defaults = AppConfig::default();
        AppConfig {
            service: pick(base.service, overlay.service, defaults.service),
            database: pick(base.database, overlay.database, defaults.database),
            workflow: pick(base.workflow, overlay.workflow, defaults.workflow),
            hold_detection: pick(
                base.hold_detection,
                overlay.hold_detection,
                defaults.hold_detection,
            ),
            cascade: pick(base.cascade, overlay.cascade, defaults.cascade),
            refund: pick(base.refund, overlay.refund, defaults.refund),
            recovery: pick(base.recovery, overlay.recovery, defaults.recovery),
            effects: pick(base.effects, overlay.effects, defaults.effects),
        }
    }

    /// The deployment file, with individual keys overridable per host
    /// through `{env_prefix}_SECTION__KEY`
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<AppConfig> {
        if !path.is_file() {
            return Err(ConfigError::LoadError(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        Self::builder().add_file(path, true)?.add_env(env_prefix).build()
    }

    /// Layer sources explicitly; later sources win key by key
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder {
            layers: Config::builder(),
        }
    }
}

fn env_source(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Ordered stack of config sources
pub struct ConfigLoaderBuilder {
    layers: ConfigBuilder<DefaultState>,
}

impl ConfigLoaderBuilder {
    pub fn add_file(mut self, path: &Path, required: bool) -> Result<Self> {
        let format = SourceFormat::from_path(path)?;
        self.layers = self
            .layers
            .add_source(File::from(path).format(format.file_format()).required(required));
        Ok(self)
    }

    pub fn add_env(mut self, prefix: &str) -> Self {
        self.layers = self.layers.add_source(env_source(prefix));
        self
    }

    /// Value used when no source sets `key` (dotted, e.g. `cascade.hold_terminal_hours`)
    pub fn set_default(mut self, key: &str, value: &str) -> Result<Self> {
        self.layers = self.layers.set_default(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> Result<AppConfig> {
        Ok(self.layers.build()?.try_deserialize()?)
    }
}
