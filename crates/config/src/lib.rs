//! Settings for the docflow engine.
//!
//! [`AppConfig`] groups the business rules (passing score, loop cap, cascade
//! delays, refund shares) with deployment settings. [`ConfigLoader`] reads it
//! from TOML, YAML or JSON with `DOCFLOW_SECTION__KEY` overrides, and
//! [`validate_config`] reports every problem in one error.

mod config;
mod loader;
mod validation;

pub use config::*;
pub use loader::*;
pub use validation::*;

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    LoadError(String),

    #[error("invalid config: {0}")]
    ValidationError(String),

    #[error("config io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config source error: {0}")]
    ConfigLibError(#[from] ::config::ConfigError),

    #[error("malformed TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("malformed YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("malformed JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
