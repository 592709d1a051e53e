//! Application configuration
//!
//! Layered, later sources win:
//! - built-in defaults
//! - `source-mapper.toml` in the working directory (optional) or `--config <path>`
//! - environment variables `SOURCE_MAPPER_<SECTION>__<KEY>`
//!
//! ## Example config file (source-mapper.toml):
//! ```toml
//! [database]
//! path = "data/mapper.db"
//! wal = true
//!
//! [registry]
//! seed_defaults = true
//!
//! [logging]
//! filter = "source_mapper=debug,info"
//!
//! [runner]
//! fail_on_drift = false
//! ```

use config_crate::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "source-mapper.toml";
const ENV_PREFIX: &str = "SOURCE_MAPPER";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding models, mappings and the audit trail
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Use WAL journal mode
    #[serde(default = "default_true")]
    pub wal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Add the built-in System Models on startup when missing
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; RUST_LOG takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Abort test runs whose mapping references fields the model no longer has
    #[serde(default)]
    pub fail_on_drift: bool,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("source-mapper.db")
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal: true,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            seed_defaults: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl AppConfig {
    /// Load from the default file location and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load with an explicit config file, which must exist
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(config_path, None)
    }

    /// `env` replaces the process environment when given
    fn build(
        config_path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = match config_path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        builder.build()?.try_deserialize()
    }

    /// Render as TOML, e.g. for `source-mapper config`
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
